use crate::types::ServiceId;
use std::collections::BTreeSet;

/// State accumulated while validating one instruction list
///
/// Only services touched by the list itself are tracked. Services that
/// exist in the enclave from earlier runs are unknown here and may be
/// referenced freely.
#[derive(Debug, Clone, Default)]
pub struct ValidatorEnvironment {
    required_images: BTreeSet<String>,
    services: BTreeSet<ServiceId>,
    removed: BTreeSet<ServiceId>,
}

impl ValidatorEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_image(&mut self, image: impl Into<String>) {
        self.required_images.insert(image.into());
    }

    pub fn required_images(&self) -> impl Iterator<Item = &str> {
        self.required_images.iter().map(String::as_str)
    }

    pub fn required_image_count(&self) -> usize {
        self.required_images.len()
    }

    /// Returns false if the service was already added by the list
    pub fn add_service(&mut self, service_id: ServiceId) -> bool {
        self.removed.remove(&service_id);
        self.services.insert(service_id)
    }

    pub fn remove_service(&mut self, service_id: &ServiceId) {
        self.services.remove(service_id);
        self.removed.insert(service_id.clone());
    }

    pub fn has_service(&self, service_id: &ServiceId) -> bool {
        self.services.contains(service_id)
    }

    /// True once the list removed the service and did not add it back
    pub fn is_removed(&self, service_id: &ServiceId) -> bool {
        self.removed.contains(service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_images_have_set_semantics() {
        let mut env = ValidatorEnvironment::new();
        env.require_image("redis");
        env.require_image("postgres");
        env.require_image("redis");
        assert_eq!(env.required_images().collect::<Vec<_>>(), vec!["postgres", "redis"]);
    }

    #[test]
    fn test_duplicate_service_is_reported() {
        let mut env = ValidatorEnvironment::new();
        assert!(env.add_service(ServiceId::new("db")));
        assert!(!env.add_service(ServiceId::new("db")));
    }

    #[test]
    fn test_removed_service_can_be_added_back() {
        let db = ServiceId::new("db");
        let mut env = ValidatorEnvironment::new();
        assert!(!env.is_removed(&db));

        env.add_service(db.clone());
        env.remove_service(&db);
        assert!(env.is_removed(&db));
        assert!(!env.has_service(&db));

        assert!(env.add_service(db.clone()));
        assert!(!env.is_removed(&db));
    }
}
