//! Identifier to surface lookup.

use crate::TrackingGeometry;
use log::debug;
use std::collections::HashMap;
use trackfit_core::{Error, Identifier, Result, Surface};

/// Maps module identifiers to the surfaces of one geometry.
///
/// Filled once, then shared by reference; lookups never mutate.
#[derive(Debug, Clone, Default)]
pub struct SurfaceRegistry<'g> {
    surfaces: HashMap<Identifier, &'g Surface>,
}

impl<'g> SurfaceRegistry<'g> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every sensitive surface of a geometry.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateIdentifier`] if two modules share an
    /// identifier.
    pub fn from_geometry(geometry: &'g TrackingGeometry) -> Result<Self> {
        let mut registry = Self::new();
        for (identifier, surface) in geometry.sensitive_surfaces() {
            registry.register(identifier, surface)?;
        }
        debug!("registered {} sensitive surfaces", registry.len());
        Ok(registry)
    }

    /// Associates an identifier with a surface.
    ///
    /// Registering the same surface again is a no-op.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateIdentifier`] if a different surface is
    /// already registered under `identifier`.
    pub fn register(&mut self, identifier: Identifier, surface: &'g Surface) -> Result<()> {
        match self.surfaces.get(&identifier) {
            Some(existing) if existing.same_as(surface) => Ok(()),
            Some(_) => Err(Error::DuplicateIdentifier(identifier)),
            None => {
                self.surfaces.insert(identifier, surface);
                Ok(())
            }
        }
    }

    /// Surface registered under `identifier`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for unregistered identifiers.
    pub fn lookup(&self, identifier: Identifier) -> Result<&'g Surface> {
        self.surfaces
            .get(&identifier)
            .copied()
            .ok_or(Error::NotFound(identifier))
    }

    /// Number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
