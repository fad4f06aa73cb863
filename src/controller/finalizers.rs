//! Finalizer handling for driver cleanup
//!
//! The finalizer keeps a driver instance around until the dummy ClusterRole
//! anchoring its cluster-scoped objects is deleted, so garbage collection
//! removes the ClusterRoles, bindings, CSIDriver and classes with it.
//! These helpers only edit metadata; the reconciler persists the change.

use kube::{Resource, ResourceExt};

/// Finalizer name used to protect driver resources
pub const DRIVER_FINALIZER: &str = "finalizer.dell.emc.com";

/// Add the finalizer if not present; returns whether metadata changed
pub fn add_finalizer<K: Resource>(obj: &mut K) -> bool {
    if has_finalizer(obj) {
        return false;
    }
    obj.finalizers_mut().push(DRIVER_FINALIZER.to_string());
    true
}

/// Drop the finalizer; returns whether metadata changed
pub fn remove_finalizer<K: Resource>(obj: &mut K) -> bool {
    let before = obj.finalizers().len();
    obj.finalizers_mut().retain(|f| f != DRIVER_FINALIZER);
    obj.finalizers().len() != before
}

/// A deletion timestamp means deletion was requested and finalizers hold it
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == DRIVER_FINALIZER)
}
