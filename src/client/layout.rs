//! 键盘布局追踪：持有编译好的 keymap 和对应的 xkb 状态。

use crate::config::ReportPolicy;
use crate::error::{Error, Result};
use std::io;
use std::os::fd::OwnedFd;
use tracing::{debug, info, warn};
use wayland_client::protocol::wl_keyboard::KeymapFormat;
use wayland_client::WEnum;
use xkbcommon::xkb;

/// 一次查询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// 还没收到 keymap
    NoKeymap,
    /// 只有一个布局且策略要求不输出
    Suppressed,
    /// 没有任何布局处于生效状态
    Unknown,
    Active(String),
}

/// keymap 与由它派生的 state 总是成对替换
struct CompiledKeymap {
    keymap: xkb::Keymap,
    state: xkb::State,
}

pub struct LayoutTracker {
    context: xkb::Context,
    compiled: Option<CompiledKeymap>,
    policy: ReportPolicy,
}

impl LayoutTracker {
    pub fn new(context: xkb::Context, policy: ReportPolicy) -> Self {
        LayoutTracker {
            context,
            compiled: None,
            policy,
        }
    }

    #[cfg(test)]
    pub fn has_keymap(&self) -> bool {
        self.compiled.is_some()
    }

    #[cfg(test)]
    pub fn num_layouts(&self) -> u32 {
        self.compiled
            .as_ref()
            .map_or(0, |c| c.keymap.num_layouts())
    }

    /// 处理 wl_keyboard.keymap。
    ///
    /// 格式不对或映射失败都是致命错误；无论成功与否，fd 和映射都在返回前释放。
    /// 编译失败不是致命错误，只丢弃当前的 keymap。
    pub fn on_keymap_update(
        &mut self,
        format: WEnum<KeymapFormat>,
        fd: OwnedFd,
        size: u32,
    ) -> Result<()> {
        match format {
            WEnum::Value(KeymapFormat::XkbV1) => {}
            other => {
                drop(fd);
                let raw = match other {
                    WEnum::Value(f) => u32::from(f),
                    WEnum::Unknown(raw) => raw,
                };
                return Err(Error::UnsupportedKeymapFormat(raw));
            }
        }

        // new_from_fd 按带结尾 NUL 的长度计算，0 会下溢
        if size == 0 {
            return Err(Error::KeymapMap(io::Error::new(
                io::ErrorKind::InvalidInput,
                "keymap size is zero",
            )));
        }

        // SAFETY: fd 来自 wl_keyboard.keymap，合成器保证 size 字节可以只读映射；
        // 映射是 MAP_PRIVATE 的，在返回前解除，fd 随之关闭
        let keymap = unsafe {
            xkb::Keymap::new_from_fd(
                &self.context,
                fd,
                size as usize,
                xkb::KEYMAP_FORMAT_TEXT_V1,
                xkb::KEYMAP_COMPILE_NO_FLAGS,
            )
        }
        .map_err(Error::KeymapMap)?;

        self.install(keymap);
        Ok(())
    }

    /// 整体替换 keymap/state，旧的一对随之释放
    fn install(&mut self, keymap: Option<xkb::Keymap>) {
        self.compiled = match keymap {
            Some(keymap) => {
                let state = xkb::State::new(&keymap);
                info!("-> 已加载新 keymap，共 {} 个布局", keymap.num_layouts());
                Some(CompiledKeymap { keymap, state })
            }
            None => {
                warn!("-> keymap 编译失败，丢弃当前 keymap");
                None
            }
        };
    }

    /// 处理 wl_keyboard.modifiers；keymap 之前到达的更新直接忽略
    pub fn on_modifiers_update(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) {
        let Some(compiled) = self.compiled.as_mut() else {
            debug!("-> 尚无 keymap，忽略 modifiers 更新");
            return;
        };
        compiled
            .state
            .update_mask(depressed, latched, locked, 0, 0, group);
    }

    pub fn observe(&self) -> Observation {
        let Some(compiled) = &self.compiled else {
            return Observation::NoKeymap;
        };
        let num_layouts = compiled.keymap.num_layouts();
        if self.policy == ReportPolicy::Ambiguous && num_layouts < 2 {
            return Observation::Suppressed;
        }

        first_active(num_layouts, |idx| {
            compiled
                .state
                .layout_index_is_active(idx, xkb::STATE_LAYOUT_EFFECTIVE)
        })
        .map_or(Observation::Unknown, |idx| {
            Observation::Active(compiled.keymap.layout_get_name(idx).to_string())
        })
    }

    /// 当前生效的布局名，取编号最小的那个
    pub fn active_layout_name(&self) -> Option<String> {
        match self.observe() {
            Observation::Active(name) => Some(name),
            _ => None,
        }
    }

    pub fn layout_names(&self) -> Vec<String> {
        let Some(compiled) = &self.compiled else {
            return Vec::new();
        };
        (0..compiled.keymap.num_layouts())
            .map(|idx| compiled.keymap.layout_get_name(idx).to_string())
            .collect()
    }
}

/// 从 0 开始找第一个生效的布局，多个同时生效时只取第一个
fn first_active(num_layouts: u32, is_active: impl Fn(u32) -> bool) -> Option<u32> {
    (0..num_layouts).find(|&idx| is_active(idx))
}
