//! Turning the desktop's render list into smithay render elements

use std::time::Duration;

use smithay::{
    backend::renderer::{
        element::{
            solid::{SolidColorBuffer, SolidColorRenderElement},
            surface::WaylandSurfaceRenderElement,
            AsRenderElements, Kind,
        },
        ImportAll, ImportMem, Renderer, Texture,
    },
    output::Output,
    utils::Scale,
};

use crate::scene::{overlay_rects, RenderItem};
use crate::state::Flick;

smithay::backend::renderer::element::render_elements! {
    pub FlickRenderElement<R> where
        R: ImportAll + ImportMem;
    Surface=WaylandSurfaceRenderElement<R>,
    Solid=SolidColorRenderElement,
}

/// Background when nothing covers the output.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Elements for the current frame, front to back.
pub fn render_elements<R>(renderer: &mut R, state: &Flick) -> Vec<FlickRenderElement<R>>
where
    R: Renderer + ImportAll + ImportMem,
    R::TextureId: Texture + Clone + 'static,
{
    let size = (state.screen_size.w, state.screen_size.h);
    let mut layers: Vec<Vec<FlickRenderElement<R>>> = Vec::new();

    for item in state.desktop.render_list() {
        match item {
            RenderItem::Surface(id) => {
                let Some(window) = state.window(id) else {
                    continue;
                };
                let elements: Vec<WaylandSurfaceRenderElement<R>> =
                    window.render_elements(renderer, (0, 0).into(), Scale::from(1.0), 1.0);
                layers.push(elements.into_iter().map(FlickRenderElement::Surface).collect());
            }
            RenderItem::Overlay(overlay) => {
                // Rects come bottom to top; elements go front to back
                let layer = overlay_rects(&overlay, size)
                    .into_iter()
                    .rev()
                    .filter(|rect| rect.w > 0 && rect.h > 0)
                    .map(|rect| {
                        let buffer = SolidColorBuffer::new((rect.w, rect.h), rect.color);
                        FlickRenderElement::Solid(SolidColorRenderElement::from_buffer(
                            &buffer,
                            (rect.x, rect.y),
                            Scale::from(1.0),
                            1.0,
                            Kind::Unspecified,
                        ))
                    })
                    .collect();
                layers.push(layer);
            }
        }
    }

    layers.into_iter().rev().flatten().collect()
}

/// Frame callbacks for every surface on screen.
pub fn send_frames(state: &Flick, output: &Output) {
    let time = state.start_time.elapsed();
    for item in state.desktop.render_list() {
        if let RenderItem::Surface(id) = item {
            if let Some(window) = state.window(id) {
                window.send_frame(output, time, Some(Duration::ZERO), |_, _| {
                    Some(output.clone())
                });
            }
        }
    }
}
