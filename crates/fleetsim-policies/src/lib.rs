//! Built-in routing policies for FleetSim.
//!
//! This crate provides the [`RoutingPolicy`] trait and the built-in
//! arrival-time placement policies:
//!
//! | Policy | Strategy |
//! |--------|----------|
//! | [`PowerOfTwoChoices`] | Sample two accelerators, pick the less loaded |
//! | [`RoundRobin`] | Placeholder (always accelerator 0) |
//! | [`LeastLoaded`] | Placeholder (always accelerator 0) |

pub mod least_loaded;
pub mod power_of_two;
pub mod round_robin;
pub mod traits;

pub use least_loaded::LeastLoaded;
pub use power_of_two::PowerOfTwoChoices;
pub use round_robin::RoundRobin;
pub use traits::{GpuSnapshot, RoutingPolicy};

/// Create a routing policy by name.
pub fn policy_by_name(name: &str) -> Option<Box<dyn RoutingPolicy>> {
    match name {
        "power_of_two_choices" => Some(Box::new(PowerOfTwoChoices::new())),
        "round_robin" => Some(Box::new(RoundRobin::new())),
        "least_loaded" => Some(Box::new(LeastLoaded::new())),
        _ => None,
    }
}

/// List all built-in policy names.
pub fn available_policies() -> Vec<&'static str> {
    vec!["power_of_two_choices", "round_robin", "least_loaded"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_by_name() {
        for name in available_policies() {
            let policy = policy_by_name(name);
            assert!(policy.is_some(), "Missing: {}", name);
            assert_eq!(policy.unwrap().name(), name);
        }
        assert!(policy_by_name("nonexistent").is_none());
    }

    #[test]
    fn test_available_policies_not_empty() {
        assert!(!available_policies().is_empty());
    }
}
