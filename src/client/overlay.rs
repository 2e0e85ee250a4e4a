//! overlay 模式下的 layer surface。只做配置和 configure 应答，从不提交 buffer。

use crate::client::globals::Globals;
use crate::client::Session;
use crate::config::{AnchorEdge, Interactivity, LayerKind, OverlayConfig};
use crate::protocol::layer_shell::zwlr_layer_shell_v1::Layer;
use crate::protocol::layer_shell::zwlr_layer_surface_v1::{
    self, Anchor, KeyboardInteractivity, ZwlrLayerSurfaceV1,
};
use tracing::{debug, info, warn};
use wayland_client::protocol::wl_surface::WlSurface;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};

pub struct Overlay {
    pub surface: WlSurface,
    pub layer_surface: ZwlrLayerSurfaceV1,
    pub configured: bool,
}

impl Overlay {
    /// 缺少 compositor 或 layer shell 时返回 None
    pub fn create(globals: &Globals, config: &OverlayConfig, qh: &QueueHandle<Session>) -> Option<Self> {
        let (Some(compositor), Some(layer_shell)) = (&globals.compositor, &globals.layer_shell) else {
            warn!("-> 缺少 compositor 或 layer shell，无法创建 overlay");
            return None;
        };

        let surface = compositor.create_surface(qh, ());
        let layer_surface = layer_shell.get_layer_surface(
            &surface,
            None,
            layer(config.layer),
            config.namespace.clone(),
            qh,
            (),
        );
        layer_surface.set_size(config.width, config.height);
        layer_surface.set_anchor(anchor(&config.anchor));
        layer_surface.set_exclusive_zone(config.exclusive_zone);
        layer_surface.set_keyboard_interactivity(interactivity(
            config.keyboard_interactivity,
            layer_shell.version(),
        ));
        surface.commit();

        info!("-> 已创建 overlay ({}x{})", config.width, config.height);
        Some(Overlay {
            surface,
            layer_surface,
            configured: false,
        })
    }
}

fn layer(kind: LayerKind) -> Layer {
    match kind {
        LayerKind::Background => Layer::Background,
        LayerKind::Bottom => Layer::Bottom,
        LayerKind::Top => Layer::Top,
        LayerKind::Overlay => Layer::Overlay,
    }
}

fn anchor(edges: &[AnchorEdge]) -> Anchor {
    edges.iter().fold(Anchor::empty(), |acc, edge| {
        acc | match edge {
            AnchorEdge::Top => Anchor::Top,
            AnchorEdge::Bottom => Anchor::Bottom,
            AnchorEdge::Left => Anchor::Left,
            AnchorEdge::Right => Anchor::Right,
        }
    })
}

/// on_demand 需要 layer shell v4，更早的版本退回 exclusive
fn interactivity(kind: Interactivity, version: u32) -> KeyboardInteractivity {
    match kind {
        Interactivity::None => KeyboardInteractivity::None,
        Interactivity::Exclusive => KeyboardInteractivity::Exclusive,
        Interactivity::OnDemand if version >= 4 => KeyboardInteractivity::OnDemand,
        Interactivity::OnDemand => KeyboardInteractivity::Exclusive,
    }
}

// --- 监听 ZwlrLayerSurfaceV1 (configure / closed) ---
impl Dispatch<ZwlrLayerSurfaceV1, ()> for Session {
    fn event(
        state: &mut Self,
        proxy: &ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(overlay) = state.overlay.as_mut().filter(|o| &o.layer_surface == proxy) else {
            return;
        };
        match event {
            zwlr_layer_surface_v1::Event::Configure {
                serial,
                width,
                height,
            } => {
                debug!("-> overlay configure: {}x{}", width, height);
                proxy.ack_configure(serial);
                overlay.surface.commit();
                overlay.configured = true;
            }
            zwlr_layer_surface_v1::Event::Closed => {
                info!("-> overlay 已被合成器关闭");
                state.running = false;
            }
            _ => {}
        }
    }
}
