use crate::pricing::PricingResolver;

/// Shared server state. The resolver synchronizes its own cache.
pub struct AppState {
    pub resolver: PricingResolver,
}
