use crate::client::globals::GlobalKind;
use std::io;
use thiserror::Error;
use wayland_client::{ConnectError, DispatchError};

/// 所有致命错误。出现任何一个，进程打印诊断后以非零状态退出。
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to connect to compositor: {0}")]
    Connect(#[from] ConnectError),

    #[error("wayland dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("no {} ({})", .0.label(), .0.interface())]
    MissingGlobal(GlobalKind),

    #[error("compositor advertised a second wl_seat (global {0}), only one seat is supported")]
    MultipleSeats(u32),

    #[error("unable to create xkb context")]
    XkbContext,

    #[error("unknown keymap format {0}")]
    UnsupportedKeymapFormat(u32),

    #[error("unable to initialize keymap shm: {0}")]
    KeymapMap(#[source] io::Error),

    #[error("event loop poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to write layout: {0}")]
    Output(#[source] io::Error),

    #[error("failed to encode layout: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
