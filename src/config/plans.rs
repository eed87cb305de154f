// Plan catalog: maps purchasable plans to Stripe prices and checkout modes

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

use crate::app_config::StripeConfig;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Invalid plan selected")]
    UnknownPlan(String),

    #[error("No Stripe price configured for plan {0}")]
    PriceNotConfigured(Plan),
}

/// A purchasable plan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    OneTime,
    Monthly,
    Yearly,
}

/// Stripe Checkout mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Payment => "payment",
            CheckoutMode::Subscription => "subscription",
        }
    }
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::OneTime => "one_time",
            Plan::Monthly => "monthly",
            Plan::Yearly => "yearly",
        }
    }

    pub fn checkout_mode(&self) -> CheckoutMode {
        match self {
            Plan::OneTime => CheckoutMode::Payment,
            Plan::Monthly | Plan::Yearly => CheckoutMode::Subscription,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.checkout_mode() == CheckoutMode::Subscription
    }

    /// Map a Stripe recurring interval to a subscription plan
    pub fn from_interval(interval: &str) -> Option<Self> {
        match interval {
            "year" => Some(Plan::Yearly),
            "month" => Some(Plan::Monthly),
            _ => None,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(Plan::OneTime),
            "monthly" => Ok(Plan::Monthly),
            "yearly" => Ok(Plan::Yearly),
            other => Err(PlanError::UnknownPlan(other.to_string())),
        }
    }
}

/// Public description of a plan
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub plan: Plan,
    pub display_name: String,
    pub amount_cents: u32,
    pub currency: String,
    pub interval: Option<String>,
    /// Credits granted by a one-time purchase; None means unlimited while active
    pub credits: Option<i64>,
    pub available: bool,
}

/// Plan catalog resolved from configuration
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    one_time_price: Option<String>,
    monthly_price: Option<String>,
    yearly_price: Option<String>,
    credits_per_pack: i64,
}

impl PlanCatalog {
    pub fn new(stripe: &StripeConfig, credits_per_pack: i64) -> Self {
        Self {
            one_time_price: stripe.price_one_time.clone(),
            monthly_price: stripe.price_monthly.clone(),
            yearly_price: stripe.price_yearly.clone(),
            credits_per_pack,
        }
    }

    /// Build a catalog from explicit price ids
    pub fn from_prices(
        one_time: Option<&str>,
        monthly: Option<&str>,
        yearly: Option<&str>,
        credits_per_pack: i64,
    ) -> Self {
        Self {
            one_time_price: one_time.map(String::from),
            monthly_price: monthly.map(String::from),
            yearly_price: yearly.map(String::from),
            credits_per_pack,
        }
    }

    pub fn credits_per_pack(&self) -> i64 {
        self.credits_per_pack
    }

    fn configured_price(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::OneTime => self.one_time_price.as_deref(),
            Plan::Monthly => self.monthly_price.as_deref(),
            Plan::Yearly => self.yearly_price.as_deref(),
        }
    }

    /// Stripe price id for a plan
    pub fn price_for(&self, plan: Plan) -> Result<&str, PlanError> {
        self.configured_price(plan)
            .ok_or(PlanError::PriceNotConfigured(plan))
    }

    /// Reverse lookup of a plan from a Stripe price id
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        [Plan::OneTime, Plan::Monthly, Plan::Yearly]
            .into_iter()
            .find(|plan| self.configured_price(*plan) == Some(price_id))
    }

    pub fn describe(&self) -> Vec<PlanInfo> {
        vec![
            PlanInfo {
                plan: Plan::OneTime,
                display_name: "One-time Credits".to_string(),
                amount_cents: 1000,
                currency: "usd".to_string(),
                interval: None,
                credits: Some(self.credits_per_pack),
                available: self.one_time_price.is_some(),
            },
            PlanInfo {
                plan: Plan::Monthly,
                display_name: "Monthly".to_string(),
                amount_cents: 800,
                currency: "usd".to_string(),
                interval: Some("month".to_string()),
                credits: None,
                available: self.monthly_price.is_some(),
            },
            PlanInfo {
                plan: Plan::Yearly,
                display_name: "Yearly".to_string(),
                amount_cents: 6000,
                currency: "usd".to_string(),
                interval: Some("year".to_string()),
                credits: None,
                available: self.yearly_price.is_some(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::from_prices(Some("price_once"), Some("price_month"), None, 30)
    }

    #[test]
    fn test_plan_parsing() {
        assert_eq!("one_time".parse::<Plan>(), Ok(Plan::OneTime));
        assert_eq!("yearly".parse::<Plan>(), Ok(Plan::Yearly));
        assert_eq!(
            "weekly".parse::<Plan>(),
            Err(PlanError::UnknownPlan("weekly".to_string()))
        );
    }

    #[test]
    fn test_checkout_modes() {
        assert_eq!(Plan::OneTime.checkout_mode(), CheckoutMode::Payment);
        assert_eq!(Plan::Monthly.checkout_mode(), CheckoutMode::Subscription);
        assert!(Plan::Yearly.is_recurring());
        assert!(!Plan::OneTime.is_recurring());
    }

    #[test]
    fn test_price_resolution() {
        let catalog = catalog();
        assert_eq!(catalog.price_for(Plan::Monthly), Ok("price_month"));
        assert_eq!(
            catalog.price_for(Plan::Yearly),
            Err(PlanError::PriceNotConfigured(Plan::Yearly))
        );
        assert_eq!(catalog.plan_for_price("price_once"), Some(Plan::OneTime));
        assert_eq!(catalog.plan_for_price("price_other"), None);
    }

    #[test]
    fn test_interval_mapping() {
        assert_eq!(Plan::from_interval("year"), Some(Plan::Yearly));
        assert_eq!(Plan::from_interval("month"), Some(Plan::Monthly));
        assert_eq!(Plan::from_interval("week"), None);
    }

    #[test]
    fn test_describe_marks_unconfigured_plans() {
        let plans = catalog().describe();
        let yearly = plans.iter().find(|p| p.plan == Plan::Yearly).unwrap();
        assert!(!yearly.available);
        let once = plans.iter().find(|p| p.plan == Plan::OneTime).unwrap();
        assert_eq!(once.credits, Some(30));
    }
}
