pub mod driver;
pub mod globals;
pub mod layout;
pub mod overlay;
pub mod seat;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::layer_shell::zwlr_layer_shell_v1::ZwlrLayerShellV1;
use tracing::error;
use wayland_client::protocol::wl_compositor::WlCompositor;
use wayland_client::protocol::wl_registry;
use wayland_client::protocol::wl_shm::WlShm;
use wayland_client::protocol::wl_surface::WlSurface;
use wayland_client::{delegate_noop, Connection, Dispatch, QueueHandle};
use xkbcommon::xkb;

use self::globals::Globals;
use self::layout::Observation;
use self::overlay::Overlay;
use self::seat::Seat;

/// 整个连接的状态，作为 `&mut` 传给每个事件处理函数
pub struct Session {
    pub config: Config,
    pub xkb_context: xkb::Context,
    pub globals: Globals,
    pub seat: Option<Seat>,
    pub overlay: Option<Overlay>,
    pub running: bool,
    /// 事件处理中出现的第一个致命错误
    pub fatal: Option<Error>,
}

/// xkb_context_new 失败时返回空指针，绑定层不会检查
fn checked_context(context: xkb::Context) -> Result<xkb::Context> {
    if context.get_raw_ptr().is_null() {
        return Err(Error::XkbContext);
    }
    Ok(context)
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let xkb_context = checked_context(xkb::Context::new(xkb::CONTEXT_NO_FLAGS))?;
        Ok(Session {
            config,
            xkb_context,
            globals: Globals::default(),
            seat: None,
            overlay: None,
            running: true,
            fatal: None,
        })
    }

    /// 记录致命错误并停止主循环
    pub fn fail(&mut self, err: Error) {
        error!("-> 致命错误: {}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        self.running = false;
    }

    /// 取出事件处理中记录的致命错误，交给主循环返回
    pub fn check_fatal(&mut self) -> Result<()> {
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn observe(&self) -> Observation {
        self.seat
            .as_ref()
            .map_or(Observation::NoKeymap, |s| s.controller.tracker().observe())
    }

    pub fn layout_names(&self) -> Vec<String> {
        self.seat
            .as_ref()
            .map(|s| s.controller.tracker().layout_names())
            .unwrap_or_default()
    }
}

// --- 监听 WlRegistry (寻找全局接口) ---
impl Dispatch<wl_registry::WlRegistry, ()> for Session {
    fn event(
        state: &mut Self,
        proxy: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.bind_global(proxy, name, &interface, version, qh),
            wl_registry::Event::GlobalRemove { name } => state.remove_global(name),
            _ => {}
        }
    }
}

// 这些接口的事件与布局无关
delegate_noop!(Session: ignore WlCompositor);
delegate_noop!(Session: ignore WlShm);
delegate_noop!(Session: ignore WlSurface);
delegate_noop!(Session: ignore ZwlrLayerShellV1);

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::globals::GlobalKind;
    use crate::config::OverlayConfig;
    use std::os::unix::net::UnixStream;
    use wayland_client::EventQueue;

    /// 不连合成器的本地会话：对端 socket 只负责接收请求，从不回复。
    /// 事件由测试直接交给各个 `Dispatch` 实现。
    pub(crate) struct Harness {
        pub conn: Connection,
        pub queue: EventQueue<Session>,
        pub qh: QueueHandle<Session>,
        pub registry: wl_registry::WlRegistry,
        pub session: Session,
        pub peer: UnixStream,
    }

    pub(crate) fn harness(config: Config) -> Harness {
        let (ours, peer) = UnixStream::pair().unwrap();
        let conn = Connection::from_socket(ours).unwrap();
        let queue = conn.new_event_queue();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());
        Harness {
            conn,
            queue,
            qh,
            registry,
            session: Session::new(config).unwrap(),
            peer,
        }
    }

    impl Harness {
        pub(crate) fn announce(&mut self, name: u32, interface: &str, version: u32) {
            let event = wl_registry::Event::Global {
                name,
                interface: interface.to_string(),
                version,
            };
            <Session as Dispatch<wl_registry::WlRegistry, ()>>::event(
                &mut self.session,
                &self.registry,
                event,
                &(),
                &self.conn,
                &self.qh,
            );
        }

        pub(crate) fn withdraw(&mut self, name: u32) {
            <Session as Dispatch<wl_registry::WlRegistry, ()>>::event(
                &mut self.session,
                &self.registry,
                wl_registry::Event::GlobalRemove { name },
                &(),
                &self.conn,
                &self.qh,
            );
        }
    }

    pub(crate) fn overlay_config() -> Config {
        Config {
            overlay: OverlayConfig {
                enabled: true,
                ..OverlayConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn fresh_session_reports_nothing() {
        let session = Session::new(Config::default()).unwrap();
        assert!(session.running);
        assert_eq!(session.observe(), Observation::NoKeymap);
        assert!(session.layout_names().is_empty());
    }

    #[test]
    fn null_xkb_context_is_fatal() {
        // xkb_context_unref 接受空指针，释放是安全的
        let context = unsafe { xkb::Context::from_raw_ptr(std::ptr::null_mut()) };
        let err = checked_context(context).err().unwrap();
        assert!(matches!(err, Error::XkbContext));
        assert!(checked_context(xkb::Context::new(xkb::CONTEXT_NO_FLAGS)).is_ok());
    }

    #[test]
    fn empty_session_misses_compositor_first() {
        let session = Session::new(overlay_config()).unwrap();
        assert!(session.present_globals().is_empty());
        assert!(matches!(
            session.ensure_required(),
            Err(Error::MissingGlobal(GlobalKind::Compositor))
        ));
    }

    #[test]
    fn first_fatal_error_wins() {
        let mut session = Session::new(Config::default()).unwrap();
        session.fail(Error::UnsupportedKeymapFormat(0));
        session.fail(Error::MultipleSeats(9));
        assert!(!session.running);
        assert!(matches!(
            session.check_fatal(),
            Err(Error::UnsupportedKeymapFormat(0))
        ));
        // 取出之后不会再次返回
        assert!(session.check_fatal().is_ok());
    }

    #[test]
    fn removing_unknown_global_is_harmless() {
        let mut h = harness(Config::default());
        h.withdraw(42);
        assert!(h.session.seat.is_none());
        assert!(h.session.running);
    }
}
