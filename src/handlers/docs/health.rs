// Health check OpenAPI documentation (handler has no typed response)

use serde_json::json;

/// Health check endpoint documentation
pub fn health_endpoint() -> serde_json::Value {
    let component = json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["healthy", "unhealthy"]
            },
            "latency_ms": {
                "type": "integer",
                "nullable": true
            },
            "error": {
                "type": "string",
                "nullable": true
            }
        }
    });

    let body = json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["healthy", "degraded"],
                "description": "Overall health status"
            },
            "service": {
                "type": "string",
                "description": "Service name"
            },
            "version": {
                "type": "string"
            },
            "timestamp": {
                "type": "string",
                "format": "date-time"
            },
            "components": {
                "type": "object",
                "properties": {
                    "database": component
                }
            }
        }
    });

    json!({
        "get": {
            "tags": ["Health"],
            "summary": "Health check endpoint",
            "description": "Returns the health status of the service and its database",
            "operationId": "healthCheck",
            "responses": {
                "200": {
                    "description": "Service is healthy",
                    "content": { "application/json": { "schema": body.clone() } }
                },
                "503": {
                    "description": "Database unreachable",
                    "content": { "application/json": { "schema": body } }
                }
            }
        }
    })
}
