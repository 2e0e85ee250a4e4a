//! 启动握手与主循环。

use crate::client::overlay::Overlay;
use crate::client::Session;
use crate::config::{Config, ReportMode};
use crate::error::Result;
use crate::event_loop::{EventLoop, Interest, PostAction, Readiness, Token};
use crate::report::Reporter;
use std::io;
use std::os::fd::RawFd;
use tracing::{debug, info, trace, warn};
use wayland_backend::client::{ReadEventsGuard, WaylandError};
use wayland_client::{Connection, EventQueue};

/// 事件循环回调的上下文
struct LoopData {
    conn: Connection,
    queue: EventQueue<Session>,
    session: Session,
    /// prepare_read 得到的读取权，poll 之后未使用即丢弃（等同于取消读取）
    pending_read: Option<ReadEventsGuard>,
    /// 输出缓冲区写不进去时对连接 fd 的可写监听
    write_watch: Option<Token>,
}

/// 一次 flush 的结果
#[derive(Debug, PartialEq, Eq)]
enum Flush {
    Done,
    /// socket 写满，等可写后重试
    Blocked,
    Broken,
}

fn classify_flush(result: std::result::Result<(), WaylandError>) -> Flush {
    match result {
        Ok(()) => Flush::Done,
        Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Flush::Blocked,
        Err(e) => {
            warn!("-> 刷新 Wayland 缓冲区失败: {}", e);
            Flush::Broken
        }
    }
}

/// 连接可读：读取并分发事件
fn display_in(_fd: RawFd, readiness: Readiness, data: &mut LoopData) -> PostAction {
    if let Some(guard) = data.pending_read.take() {
        match guard.read() {
            Ok(_) => {}
            Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!("-> 读取 Wayland 事件失败 ({:?}): {}", readiness, e);
                data.session.running = false;
                return PostAction::Continue;
            }
        }
    }

    if let Err(e) = data.queue.dispatch_pending(&mut data.session) {
        warn!("-> 分发 Wayland 事件失败: {}", e);
        data.session.running = false;
    }
    PostAction::Continue
}

/// 连接可写：继续刷新积压的请求，写完后撤销监听
fn display_out(_fd: RawFd, _readiness: Readiness, data: &mut LoopData) -> PostAction {
    match classify_flush(data.queue.flush()) {
        Flush::Blocked => PostAction::Continue,
        Flush::Done => {
            trace!("-> 积压的请求已写出");
            data.write_watch = None;
            PostAction::Remove
        }
        Flush::Broken => {
            data.session.running = false;
            data.write_watch = None;
            PostAction::Remove
        }
    }
}

impl LoopData {
    /// 根据 flush 结果维护可写监听，连接断开时返回 false
    fn after_flush(
        &mut self,
        result: std::result::Result<(), WaylandError>,
        event_loop: &mut EventLoop<LoopData>,
    ) -> bool {
        match classify_flush(result) {
            Flush::Done => {
                if let Some(token) = self.write_watch.take() {
                    event_loop.remove(token);
                }
                true
            }
            Flush::Blocked => {
                if self.write_watch.is_none() {
                    debug!("-> 输出缓冲区已满，等待连接可写");
                    let backend = self.conn.backend();
                    let token = event_loop.register(backend.poll_fd(), Interest::WRITE, display_out);
                    self.write_watch = Some(token);
                }
                true
            }
            Flush::Broken => false,
        }
    }
}

fn report(reporter: &mut Reporter, session: &Session) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    reporter.emit(&mut out, &session.observe(), &session.layout_names())?;
    Ok(())
}

/// 连接合成器并一直运行到 run 标志被清除。致命错误以 Err 返回。
pub fn run(config: Config) -> Result<()> {
    let conn = Connection::connect_to_env()?;
    let mut queue = conn.new_event_queue::<Session>();
    let qh = queue.handle();

    let mut session = Session::new(config)?;
    let _registry = conn.display().get_registry(&qh, ());
    queue.roundtrip(&mut session)?;

    session.check_fatal()?;
    session.ensure_required()?;
    info!("-> 必需的全局接口已就绪");

    if session.config.overlay.enabled {
        session.overlay = Overlay::create(&session.globals, &session.config.overlay, &qh);
    }

    let mode = session.config.report.mode;
    let mut reporter = Reporter::new(&session.config.report);

    let mut event_loop: EventLoop<LoopData> = EventLoop::new();
    event_loop.register(conn.backend().poll_fd(), Interest::READ, display_in);

    let mut data = LoopData {
        conn,
        queue,
        session,
        pending_read: None,
        write_watch: None,
    };

    while data.session.running {
        if mode == ReportMode::Polling {
            report(&mut reporter, &data.session)?;
        }

        if let Err(e) = data.queue.dispatch_pending(&mut data.session) {
            warn!("-> 分发 Wayland 事件失败: {}", e);
            break;
        }
        data.session.check_fatal()?;
        if !data.session.running {
            break;
        }

        let flushed = data.queue.flush();
        if !data.after_flush(flushed, &mut event_loop) {
            break;
        }

        // 队列里已有事件时拿不到读取权，回到循环开头先分发
        data.pending_read = data.queue.prepare_read();
        if data.pending_read.is_none() {
            continue;
        }

        let polled = event_loop.poll(&mut data, None);
        data.pending_read = None;
        polled?;

        data.session.check_fatal()?;
    }
    debug!("-> 主循环结束");

    if mode == ReportMode::Oneshot {
        report(&mut reporter, &data.session)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::harness;
    use std::time::Duration;

    fn loop_data() -> (LoopData, std::os::unix::net::UnixStream) {
        let h = harness(Config::default());
        let data = LoopData {
            conn: h.conn,
            queue: h.queue,
            session: h.session,
            pending_read: None,
            write_watch: None,
        };
        (data, h.peer)
    }

    fn would_block() -> std::result::Result<(), WaylandError> {
        Err(WaylandError::Io(io::ErrorKind::WouldBlock.into()))
    }

    #[test]
    fn flush_outcomes() {
        assert_eq!(classify_flush(Ok(())), Flush::Done);
        assert_eq!(classify_flush(would_block()), Flush::Blocked);
        assert_eq!(
            classify_flush(Err(WaylandError::Io(io::ErrorKind::BrokenPipe.into()))),
            Flush::Broken
        );
    }

    #[test]
    fn blocked_flush_waits_for_writable_display() {
        let (mut data, _peer) = loop_data();
        let mut event_loop: EventLoop<LoopData> = EventLoop::new();

        assert!(data.after_flush(would_block(), &mut event_loop));
        assert!(data.write_watch.is_some());
        // 重复阻塞不会重复注册
        assert!(data.after_flush(would_block(), &mut event_loop));
        assert_eq!(event_loop.len(), 1);

        // 对端有空间，可写回调把 get_registry 请求写出并撤销监听
        let n = event_loop
            .poll(&mut data, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(n, 1);
        assert!(data.write_watch.is_none());
        assert!(event_loop.is_empty());
        assert!(data.session.running);
    }

    #[test]
    fn successful_flush_drops_write_watch() {
        let (mut data, _peer) = loop_data();
        let mut event_loop: EventLoop<LoopData> = EventLoop::new();

        assert!(data.after_flush(would_block(), &mut event_loop));
        assert!(data.after_flush(Ok(()), &mut event_loop));
        assert!(data.write_watch.is_none());
        assert!(event_loop.is_empty());
    }

    #[test]
    fn broken_flush_stops_the_loop() {
        let (mut data, _peer) = loop_data();
        let mut event_loop: EventLoop<LoopData> = EventLoop::new();
        let broken = Err(WaylandError::Io(io::ErrorKind::BrokenPipe.into()));
        assert!(!data.after_flush(broken, &mut event_loop));
        assert!(event_loop.is_empty());
    }
}
