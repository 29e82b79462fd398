//! Rendering session identity
//!
//! A session is one active scene: the key its desired state is stored under,
//! and the render surface its filters are attached to.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::surface::RenderSurface;

/// Identifier of a rendering session (e.g. a scene id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An active rendering session
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    surface: Option<Arc<dyn RenderSurface>>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            id: id.into(),
            surface: Some(surface),
        }
    }

    /// A session whose surface has not been created (or was already discarded)
    pub fn without_surface(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            surface: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn surface(&self) -> Option<&Arc<dyn RenderSurface>> {
        self.surface.as_ref()
    }

    /// Same id and same surface object (or both without a surface)
    pub fn is_same(&self, other: &Session) -> bool {
        let same_surface = match (&self.surface, &other.surface) {
            (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (None, None) => true,
            _ => false,
        };
        self.id == other.id && same_surface
    }
}


impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("has_surface", &self.surface.is_some())
            .finish()
    }
}
