//! Headless display surface: renders marker operations as log events and
//! keeps the viewport for the control socket.

use wxmap_core::{LngLat, Marker, MarkerId};
use wxmap_markers::DisplaySurface;

/// Zoom level the viewport is opened at on the first reading.
pub const INITIAL_ZOOM: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: LngLat,
    pub zoom: u8,
}

#[derive(Debug, Default)]
pub struct TracingSurface {
    viewport: Option<Viewport>,
    attached: usize,
}

impl TracingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first recenter.
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn attached(&self) -> usize {
        self.attached
    }
}

impl DisplaySurface for TracingSurface {
    type Handle = MarkerId;

    fn attach(&mut self, marker: &Marker) -> MarkerId {
        self.attached += 1;
        tracing::debug!(
            marker = %marker.id,
            lng = marker.position.lng,
            lat = marker.position.lat,
            label = %marker.label,
            "marker attached"
        );
        marker.id
    }

    fn detach(&mut self, handle: MarkerId) {
        self.attached = self.attached.saturating_sub(1);
        tracing::debug!(marker = %handle, "marker detached");
    }

    fn recenter(&mut self, center: LngLat) {
        let zoom = self.viewport.map_or(INITIAL_ZOOM, |v| v.zoom);
        self.viewport = Some(Viewport { center, zoom });
        tracing::info!(lng = center.lng, lat = center.lat, zoom, "viewport centred");
    }
}
