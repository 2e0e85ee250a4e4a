use crate::client::layout::LayoutTracker;
use crate::client::Session;
use crate::config::ReportMode;
use tracing::{debug, info};
use wayland_client::protocol::wl_keyboard::{self, WlKeyboard};
use wayland_client::protocol::wl_seat::{self, Capability, WlSeat};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};

/// seat 下可释放的键盘对象
pub trait SeatKeyboard {
    fn discard(self);
}

impl SeatKeyboard for WlKeyboard {
    fn discard(self) {
        // release 请求从 v3 开始才有，更早的版本只能丢弃代理
        if self.version() >= 3 {
            self.release();
        }
    }
}

/// 键盘能力状态机：要么没有键盘，要么恰好持有一个
pub struct SeatController<K> {
    keyboard: Option<K>,
    tracker: LayoutTracker,
}

impl<K: SeatKeyboard> SeatController<K> {
    pub fn new(tracker: LayoutTracker) -> Self {
        SeatController {
            keyboard: None,
            tracker,
        }
    }

    /// 每次能力变化都先释放旧键盘，再按需创建新键盘
    pub fn on_capabilities<F>(&mut self, capabilities: Capability, create: F)
    where
        F: FnOnce() -> K,
    {
        self.release_keyboard();
        if capabilities.contains(Capability::Keyboard) {
            self.keyboard = Some(create());
            debug!("-> 已创建键盘对象");
        }
    }

    pub fn release_keyboard(&mut self) {
        if let Some(keyboard) = self.keyboard.take() {
            keyboard.discard();
            debug!("-> 已释放键盘对象");
        }
    }

    pub fn keyboard(&self) -> Option<&K> {
        self.keyboard.as_ref()
    }

    pub fn has_keyboard(&self) -> bool {
        self.keyboard.is_some()
    }

    pub fn tracker(&self) -> &LayoutTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut LayoutTracker {
        &mut self.tracker
    }
}

pub struct Seat {
    pub wl_seat: WlSeat,
    /// registry 中的全局名，用于处理 global_remove
    pub global_name: u32,
    pub name: Option<String>,
    pub controller: SeatController<WlKeyboard>,
}

impl Seat {
    pub fn new(wl_seat: WlSeat, global_name: u32, tracker: LayoutTracker) -> Self {
        Seat {
            wl_seat,
            global_name,
            name: None,
            controller: SeatController::new(tracker),
        }
    }

    /// seat 全局被移除时调用
    pub fn release(mut self) {
        self.controller.release_keyboard();
        if self.wl_seat.version() >= 5 {
            self.wl_seat.release();
        }
    }
}

// --- 监听 WlSeat (能力变化) ---
impl Dispatch<WlSeat, ()> for Session {
    fn event(
        state: &mut Self,
        proxy: &WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let Some(seat) = state.seat.as_mut().filter(|s| &s.wl_seat == proxy) else {
            return;
        };
        match event {
            wl_seat::Event::Capabilities { capabilities } => {
                let capabilities = match capabilities {
                    WEnum::Value(caps) => caps,
                    WEnum::Unknown(raw) => Capability::from_bits_truncate(raw),
                };
                info!("-> seat 能力变化: {:?}", capabilities);
                seat.controller
                    .on_capabilities(capabilities, || proxy.get_keyboard(qh, ()));
            }
            wl_seat::Event::Name { name } => {
                debug!("-> seat 名称: {}", name);
                seat.name = Some(name);
            }
            _ => {}
        }
    }
}

// --- 监听 WlKeyboard (keymap 与 modifiers) ---
impl Dispatch<WlKeyboard, ()> for Session {
    fn event(
        state: &mut Self,
        proxy: &WlKeyboard,
        event: wl_keyboard::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // 只处理当前键盘的事件，旧键盘残留的事件（连同其中的 fd）直接丢弃
        let Some(seat) = state
            .seat
            .as_mut()
            .filter(|s| s.controller.keyboard() == Some(proxy))
        else {
            return;
        };

        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                let result = seat
                    .controller
                    .tracker_mut()
                    .on_keymap_update(format, fd, size);
                match result {
                    Ok(()) => {
                        if state.config.report.mode == ReportMode::Oneshot {
                            state.running = false;
                        }
                    }
                    Err(e) => state.fail(e),
                }
            }
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => {
                let tracker = seat.controller.tracker_mut();
                tracker.on_modifiers_update(mods_depressed, mods_latched, mods_locked, group);
                if let Some(name) = tracker.active_layout_name() {
                    debug!("-> 当前布局: {}", name);
                }
            }
            // enter/leave/key/repeat_info 不携带布局信息
            _ => {}
        }
    }
}
