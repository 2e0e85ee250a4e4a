use crate::client::layout::LayoutTracker;
use crate::client::seat::Seat;
use crate::client::Session;
use crate::error::{Error, Result};
use crate::protocol::layer_shell::zwlr_layer_shell_v1::ZwlrLayerShellV1;
use tracing::{info, trace, warn};
use wayland_client::protocol::wl_compositor::WlCompositor;
use wayland_client::protocol::wl_registry::WlRegistry;
use wayland_client::protocol::wl_seat::WlSeat;
use wayland_client::protocol::wl_shm::WlShm;
use wayland_client::QueueHandle;

/// 需要绑定的全局接口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Compositor,
    Shm,
    Seat,
    LayerShell,
}

impl GlobalKind {
    /// 任何模式下都必须存在，按检查顺序排列
    pub const REQUIRED: [GlobalKind; 3] = [GlobalKind::Compositor, GlobalKind::Shm, GlobalKind::Seat];

    pub fn from_interface(interface: &str) -> Option<Self> {
        match interface {
            "wl_compositor" => Some(GlobalKind::Compositor),
            "wl_shm" => Some(GlobalKind::Shm),
            "wl_seat" => Some(GlobalKind::Seat),
            "zwlr_layer_shell_v1" => Some(GlobalKind::LayerShell),
            _ => None,
        }
    }

    pub fn interface(self) -> &'static str {
        match self {
            GlobalKind::Compositor => "wl_compositor",
            GlobalKind::Shm => "wl_shm",
            GlobalKind::Seat => "wl_seat",
            GlobalKind::LayerShell => "zwlr_layer_shell_v1",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlobalKind::Compositor => "compositor",
            GlobalKind::Shm => "shm",
            GlobalKind::Seat => "seat",
            GlobalKind::LayerShell => "layer shell",
        }
    }

    /// 绑定时使用的固定版本
    pub fn max_version(self) -> u32 {
        match self {
            GlobalKind::Compositor => 4,
            GlobalKind::Shm => 1,
            GlobalKind::Seat => 7,
            GlobalKind::LayerShell => 4,
        }
    }

    /// 不超过合成器宣告的版本
    pub fn bind_version(self, advertised: u32) -> u32 {
        self.max_version().min(advertised)
    }
}

/// 按顺序返回第一个缺失的必需接口
pub fn missing_required(present: &[GlobalKind], overlay: bool) -> Option<GlobalKind> {
    let layer_shell = overlay.then_some(GlobalKind::LayerShell);
    GlobalKind::REQUIRED
        .into_iter()
        .chain(layer_shell)
        .find(|kind| !present.contains(kind))
}

#[derive(Default)]
pub struct Globals {
    pub compositor: Option<WlCompositor>,
    pub shm: Option<WlShm>,
    pub layer_shell: Option<ZwlrLayerShellV1>,
}

impl Session {
    /// 处理 wl_registry.global
    pub(crate) fn bind_global(
        &mut self,
        registry: &WlRegistry,
        name: u32,
        interface: &str,
        version: u32,
        qh: &QueueHandle<Session>,
    ) {
        let Some(kind) = GlobalKind::from_interface(interface) else {
            trace!("[ID:{}] 忽略接口 {} v{}", name, interface, version);
            return;
        };
        let version = kind.bind_version(version);
        info!("[ID:{}] 发现 {} 接口，绑定 v{}", name, interface, version);

        match kind {
            GlobalKind::Compositor => {
                self.globals.compositor = Some(registry.bind(name, version, qh, ()));
            }
            GlobalKind::Shm => {
                self.globals.shm = Some(registry.bind(name, version, qh, ()));
            }
            GlobalKind::LayerShell => {
                self.globals.layer_shell = Some(registry.bind(name, version, qh, ()));
            }
            GlobalKind::Seat => {
                if let Some(seat) = &self.seat {
                    warn!("-> 已有 seat (ID:{})，不支持多个 seat", seat.global_name);
                    self.fail(Error::MultipleSeats(name));
                    return;
                }
                let wl_seat: WlSeat = registry.bind(name, version, qh, ());
                let tracker = LayoutTracker::new(self.xkb_context.clone(), self.config.report.policy);
                self.seat = Some(Seat::new(wl_seat, name, tracker));
            }
        }
    }

    /// 处理 wl_registry.global_remove，目前只关心 seat
    pub(crate) fn remove_global(&mut self, name: u32) {
        if self.seat.as_ref().is_some_and(|s| s.global_name == name) {
            info!("[ID:{}] seat 已被移除", name);
            if let Some(seat) = self.seat.take() {
                seat.release();
            }
        } else {
            trace!("[ID:{}] 全局对象已移除", name);
        }
    }

    pub fn present_globals(&self) -> Vec<GlobalKind> {
        let mut present = Vec::new();
        if self.globals.compositor.is_some() {
            present.push(GlobalKind::Compositor);
        }
        if self.globals.shm.is_some() {
            present.push(GlobalKind::Shm);
        }
        if self.seat.is_some() {
            present.push(GlobalKind::Seat);
        }
        if self.globals.layer_shell.is_some() {
            present.push(GlobalKind::LayerShell);
        }
        present
    }

    pub fn ensure_required(&self) -> Result<()> {
        match missing_required(&self.present_globals(), self.config.overlay.enabled) {
            Some(kind) => Err(Error::MissingGlobal(kind)),
            None => Ok(()),
        }
    }
}
