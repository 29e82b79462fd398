//! Render surface attachment list
//!
//! The surface owns an ordered list of filters applied on top of the scene.
//! Part of that list belongs to other layers of the application (external
//! entries); the rest is produced by the filter engine from its live
//! instances. Only the engine writes managed entries.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::effects::FilterEffect;

/// Shared handle to a live effect instance.
///
/// The engine's live state and the surface's attachment list hold clones of
/// the same handle, so identity is preserved across reconfiguration.
#[derive(Clone)]
pub struct EffectHandle(Arc<Mutex<Box<dyn FilterEffect>>>);

impl EffectHandle {
    pub fn new(effect: Box<dyn FilterEffect>) -> Self {
        Self(Arc::new(Mutex::new(effect)))
    }

    /// Lock the instance. Never hold the guard across an await point.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn FilterEffect>> {
        self.0.lock()
    }

    /// True when both handles point at the same instance
    pub fn ptr_eq(&self, other: &EffectHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Some(effect) => f
                .debug_struct("EffectHandle")
                .field("id", &effect.id())
                .field("effect_type", &effect.effect_type())
                .finish(),
            None => f.write_str("EffectHandle(<locked>)"),
        }
    }
}

/// One entry of a surface's attachment list
#[derive(Clone, Debug)]
pub enum SurfaceFilter {
    /// Filter owned by another part of the application; preserved as-is
    External { name: String },
    /// Filter produced by the engine for one live effect instance
    Managed {
        id: String,
        generation: u64,
        effect: EffectHandle,
    },
}

impl SurfaceFilter {
    pub fn external(name: impl Into<String>) -> Self {
        SurfaceFilter::External { name: name.into() }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, SurfaceFilter::Managed { .. })
    }

    /// Effect id of a managed entry
    pub fn managed_id(&self) -> Option<&str> {
        match self {
            SurfaceFilter::Managed { id, .. } => Some(id),
            SurfaceFilter::External { .. } => None,
        }
    }

    /// Check whether this is the managed entry for (`id`, `generation`)
    pub fn is_instance(&self, id: &str, generation: u64) -> bool {
        matches!(self, SurfaceFilter::Managed { id: i, generation: g, .. } if i == id && *g == generation)
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match self {
            SurfaceFilter::External { name } => format!("external:{}", name),
            SurfaceFilter::Managed { id, generation, .. } => format!("{}#{}", id, generation),
        }
    }
}

/// A rendering surface whose attachment list the engine maintains
pub trait RenderSurface: Send + Sync {
    /// Current attachment list
    fn filters(&self) -> Vec<SurfaceFilter>;

    /// Replace the attachment list
    fn set_filters(&self, filters: Vec<SurfaceFilter>);
}

/// In-memory render surface layer
#[derive(Default)]
pub struct FilterLayer {
    filters: Mutex<Vec<SurfaceFilter>>,
}

impl FilterLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter owned by another part of the application
    pub fn push_external(&self, name: impl Into<String>) {
        self.filters.lock().push(SurfaceFilter::external(name));
    }

    /// Effect ids of managed entries, in attachment order
    pub fn managed_ids(&self) -> Vec<String> {
        self.filters
            .lock()
            .iter()
            .filter_map(|f| f.managed_id().map(str::to_string))
            .collect()
    }

    /// Find the managed handle attached for an effect id
    pub fn managed_handle(&self, id: &str) -> Option<EffectHandle> {
        self.filters.lock().iter().find_map(|f| match f {
            SurfaceFilter::Managed { id: i, effect, .. } if i == id => Some(effect.clone()),
            _ => None,
        })
    }

    pub fn labels(&self) -> Vec<String> {
        self.filters.lock().iter().map(SurfaceFilter::label).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.lock().is_empty()
    }
}

impl RenderSurface for FilterLayer {
    fn filters(&self) -> Vec<SurfaceFilter> {
        self.filters.lock().clone()
    }

    fn set_filters(&self, filters: Vec<SurfaceFilter>) {
        *self.filters.lock() = filters;
    }
}

/// Rebuild an attachment list: external entries first, then `managed`.
pub fn splice_managed(current: Vec<SurfaceFilter>, managed: impl IntoIterator<Item = SurfaceFilter>) -> Vec<SurfaceFilter> {
    current
        .into_iter()
        .filter(|f| !f.is_managed())
        .chain(managed)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectOptions, EffectRegistry};

    fn handle(id: &str) -> EffectHandle {
        let registry = EffectRegistry::with_builtins();
        EffectHandle::new(registry.create("color", &EffectOptions::new(), id).unwrap())
    }

    #[test]
    fn test_splice_preserves_external_entries() {
        let layer = FilterLayer::new();
        layer.push_external("bloom");
        layer.set_filters({
            let mut filters = layer.filters();
            filters.push(SurfaceFilter::Managed {
                id: "old".to_string(),
                generation: 1,
                effect: handle("old"),
            });
            filters.push(SurfaceFilter::external("vignette"));
            filters
        });

        let spliced = splice_managed(
            layer.filters(),
            vec![SurfaceFilter::Managed {
                id: "new".to_string(),
                generation: 1,
                effect: handle("new"),
            }],
        );
        layer.set_filters(spliced);

        assert_eq!(layer.labels(), vec!["external:bloom", "external:vignette", "new#1"]);
        assert_eq!(layer.managed_ids(), vec!["new"]);
    }

    #[test]
    fn test_instance_matching() {
        let filter = SurfaceFilter::Managed {
            id: "a".to_string(),
            generation: 2,
            effect: handle("a"),
        };
        assert!(filter.is_instance("a", 2));
        assert!(!filter.is_instance("a", 1));
        assert!(!SurfaceFilter::external("a").is_instance("a", 2));
    }

    #[test]
    fn test_handle_identity() {
        let a = handle("a");
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&handle("a")));
        assert_eq!(a.lock().id(), "a");
    }
}
