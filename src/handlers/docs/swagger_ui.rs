// Swagger UI page; assets load from the swagger-ui-dist CDN

use axum::response::{Html, IntoResponse};

/// Serve Swagger UI HTML at /api/v1/docs
pub async fn serve_swagger_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Story Gen API Documentation</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui.css" />
    <style>
        body {
            margin: 0;
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Arial, sans-serif;
        }
        #swagger-ui {
            max-width: 1280px;
            margin: 0 auto;
            padding: 20px;
        }
        .topbar {
            display: none;
        }
        .header {
            background: #1f2937;
            color: #f9fafb;
            padding: 1.5rem 2rem;
        }
        .header h1 {
            margin: 0;
            font-size: 1.8rem;
        }
        .header p {
            margin: 0.4rem 0 0;
            opacity: 0.8;
        }
    </style>
</head>
<body>
    <div class="header">
        <h1>Story Gen API</h1>
        <p>User story generation, entitlements and billing</p>
    </div>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: '/api/v1/docs/openapi.json',
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout",
                docExpansion: "list",
                filter: true,
                persistAuthorization: true,
                validatorUrl: null
            });
        }
    </script>
</body>
</html>"#;
