//! Security and isolation
//!
//! Policy knobs that limit what one client can do to others: grabbing
//! input, injecting synthetic events, and exhausting server memory.

/// Security policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Allow GrabPointer and GrabButton
    pub allow_pointer_grabs: bool,

    /// Allow GrabKeyboard and GrabKey
    pub allow_keyboard_grabs: bool,

    /// Allow extension device grabs, active and passive
    pub allow_device_grabs: bool,

    /// Allow synthetic events (SendEvent)
    pub allow_synthetic_events: bool,

    /// Maximum live resources per client (0 = unlimited)
    pub max_resources_per_client: usize,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicy {
            allow_pointer_grabs: true,
            allow_keyboard_grabs: true,
            allow_device_grabs: true,
            allow_synthetic_events: true,
            max_resources_per_client: 10000,
        }
    }
}

impl SecurityPolicy {
    /// Create a permissive policy (for testing) - allows everything
    pub fn permissive() -> Self {
        SecurityPolicy {
            max_resources_per_client: 0,
            ..SecurityPolicy::default()
        }
    }

    /// Create a strict policy - no grabs, no synthetic events
    pub fn strict() -> Self {
        SecurityPolicy {
            allow_pointer_grabs: false,
            allow_keyboard_grabs: false,
            allow_device_grabs: false,
            allow_synthetic_events: false,
            max_resources_per_client: 1000,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "permissive" => Some(Self::permissive()),
            "default" => Some(Self::default()),
            "strict" => Some(Self::strict()),
            _ => None,
        }
    }

    /// Whether a client already holding `count` resources may create another
    pub fn may_allocate(&self, count: usize) -> bool {
        self.max_resources_per_client == 0 || count < self.max_resources_per_client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_cap() {
        let policy = SecurityPolicy {
            max_resources_per_client: 2,
            ..SecurityPolicy::default()
        };
        assert!(policy.may_allocate(1));
        assert!(!policy.may_allocate(2));
        assert!(SecurityPolicy::permissive().may_allocate(usize::MAX - 1));
    }

    #[test]
    fn test_named_policies() {
        assert_eq!(SecurityPolicy::from_name("strict"), Some(SecurityPolicy::strict()));
        assert!(SecurityPolicy::from_name("lax").is_none());
    }
}
