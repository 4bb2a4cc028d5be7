/// Backend implementations
///
/// The backend trait describes the host the server runs on. Only the
/// headless backend ships with the crate; embedders provide their own.
mod r#trait;
pub use r#trait::*;

pub mod null;
pub use null::NullBackend;

/// Build a backend by name
pub fn create_backend(name: &str) -> Option<Box<dyn Backend>> {
    match name {
        "null" => Some(Box::new(NullBackend::new())),
        _ => None,
    }
}

/// Get available backend names
pub fn available_backends() -> Vec<&'static str> {
    vec!["null"]
}
