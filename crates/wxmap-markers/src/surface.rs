//! DisplaySurface trait and an in-memory recording implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use wxmap_core::{LngLat, Marker, MarkerId};

/// Map-like surface markers are rendered on.
///
/// The marker store is the only writer of markers; it calls `attach` and
/// `detach` and nothing else.
pub trait DisplaySurface {
    /// Token returned by `attach`, consumed by `detach`.
    type Handle;

    fn attach(&mut self, marker: &Marker) -> Self::Handle;

    fn detach(&mut self, handle: Self::Handle);

    /// Move the viewport to `center`.
    fn recenter(&mut self, center: LngLat);
}

/// Observable call made against a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Attached(MarkerId),
    Detached(MarkerId),
    Recentered(LngLat),
}

/// Surface that records every call. Clones share one log, so a clone kept
/// aside stays inspectable after the store owning the original is dropped.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    events: Arc<Mutex<Vec<SurfaceEvent>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<SurfaceEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.log().clone()
    }

    /// Markers currently attached, in attach order.
    pub fn attached(&self) -> Vec<MarkerId> {
        let mut attached = Vec::new();
        for event in self.log().iter() {
            match event {
                SurfaceEvent::Attached(id) => attached.push(*id),
                SurfaceEvent::Detached(id) => attached.retain(|a| a != id),
                SurfaceEvent::Recentered(_) => {}
            }
        }
        attached
    }

    pub fn detach_count(&self) -> usize {
        self.log()
            .iter()
            .filter(|e| matches!(e, SurfaceEvent::Detached(_)))
            .count()
    }
}

impl DisplaySurface for RecordingSurface {
    type Handle = MarkerId;

    fn attach(&mut self, marker: &Marker) -> MarkerId {
        self.log().push(SurfaceEvent::Attached(marker.id));
        marker.id
    }

    fn detach(&mut self, handle: MarkerId) {
        self.log().push(SurfaceEvent::Detached(handle));
    }

    fn recenter(&mut self, center: LngLat) {
        self.log().push(SurfaceEvent::Recentered(center));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxmap_core::Message;

    #[test]
    fn attached_tracks_detach() {
        let mut surface = RecordingSurface::new();
        let a = Marker::from_message(MarkerId::new(1), &Message::new(0.0, 0.0, 0.0));
        let b = Marker::from_message(MarkerId::new(2), &Message::new(0.0, 0.0, 0.0));
        let ha = surface.attach(&a);
        surface.attach(&b);
        surface.detach(ha);
        assert_eq!(surface.attached(), vec![MarkerId::new(2)]);
        assert_eq!(surface.detach_count(), 1);
    }

    #[test]
    fn clones_share_log() {
        let surface = RecordingSurface::new();
        let mut writer = surface.clone();
        writer.recenter(LngLat::new(1.0, 2.0));
        assert_eq!(
            surface.events(),
            vec![SurfaceEvent::Recentered(LngLat::new(1.0, 2.0))]
        );
    }
}
