// Configuration modules for Story Gen Backend

pub mod plans;

pub use plans::{CheckoutMode, Plan, PlanCatalog, PlanError, PlanInfo};
