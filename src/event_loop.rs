//! 基于 poll(2) 的单线程事件循环。
//!
//! 所有回调都在调用 `poll` 的线程上同步执行，`poll` 返回前每个就绪的
//! 描述符恰好回调一次。回调通过 `&mut D` 拿到显式上下文，不依赖全局状态。
//! 回调里需要增删描述符时使用 [`LoopHandle`]，改动在下一次 `poll` 开始时生效。

use crate::error::{Error, Result};
use bitflags::bitflags;
use std::cell::RefCell;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

bitflags! {
    /// 注册时关心的事件
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: libc::c_short {
        const READ = libc::POLLIN;
        const WRITE = libc::POLLOUT;
    }
}

bitflags! {
    /// poll 实际报告的就绪状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: libc::c_short {
        const READ = libc::POLLIN;
        const WRITE = libc::POLLOUT;
        const ERROR = libc::POLLERR;
        const HANGUP = libc::POLLHUP;
        const INVALID = libc::POLLNVAL;
    }
}

/// 回调执行完后对该描述符的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Continue,
    /// 本轮结束后移除，不影响本轮已收集到的其它就绪描述符
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

type Callback<D> = Box<dyn FnMut(RawFd, Readiness, &mut D) -> PostAction>;

struct Source<D> {
    token: Token,
    fd: RawFd,
    interest: Interest,
    callback: Callback<D>,
}

/// 尚未生效的注册与移除，由 `EventLoop` 和所有 `LoopHandle` 共享
struct Pending<D> {
    next_token: u64,
    added: Vec<Source<D>>,
    removed: Vec<Token>,
}

impl<D> Pending<D> {
    fn token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }
}

fn boxed_source<D, F>(token: Token, fd: BorrowedFd<'_>, interest: Interest, callback: F) -> Source<D>
where
    F: FnMut(RawFd, Readiness, &mut D) -> PostAction + 'static,
{
    trace!("-> 注册描述符 {} ({:?})", fd.as_raw_fd(), interest);
    Source {
        token,
        fd: fd.as_raw_fd(),
        interest,
        callback: Box::new(callback),
    }
}

/// 可以被回调捕获的循环句柄
pub struct LoopHandle<D> {
    pending: Rc<RefCell<Pending<D>>>,
}

impl<D> Clone for LoopHandle<D> {
    fn clone(&self) -> Self {
        LoopHandle {
            pending: Rc::clone(&self.pending),
        }
    }
}

impl<D> LoopHandle<D> {
    /// 与 `EventLoop::register` 相同，但在下一次 `poll` 时才开始监听
    pub fn register<F>(&self, fd: BorrowedFd<'_>, interest: Interest, callback: F) -> Token
    where
        F: FnMut(RawFd, Readiness, &mut D) -> PostAction + 'static,
    {
        let mut pending = self.pending.borrow_mut();
        let token = pending.token();
        pending.added.push(boxed_source(token, fd, interest, callback));
        token
    }

    /// 在下一次 `poll` 开始时移除
    pub fn remove(&self, token: Token) {
        self.pending.borrow_mut().removed.push(token);
    }
}

pub struct EventLoop<D> {
    sources: Vec<Source<D>>,
    pending: Rc<RefCell<Pending<D>>>,
}

impl<D> Default for EventLoop<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Drop for EventLoop<D> {
    fn drop(&mut self) {
        // 待注册回调里可能捕获了句柄，清空以断开引用环
        self.pending.borrow_mut().added.clear();
    }
}

impl<D> EventLoop<D> {
    pub fn new() -> Self {
        EventLoop {
            sources: Vec::new(),
            pending: Rc::new(RefCell::new(Pending {
                next_token: 0,
                added: Vec::new(),
                removed: Vec::new(),
            })),
        }
    }

    pub fn handle(&self) -> LoopHandle<D> {
        LoopHandle {
            pending: Rc::clone(&self.pending),
        }
    }

    /// 注册一个描述符。调用方负责在移除之前保持它有效。
    pub fn register<F>(&mut self, fd: BorrowedFd<'_>, interest: Interest, callback: F) -> Token
    where
        F: FnMut(RawFd, Readiness, &mut D) -> PostAction + 'static,
    {
        let token = self.pending.borrow_mut().token();
        self.sources.push(boxed_source(token, fd, interest, callback));
        token
    }

    pub fn remove(&mut self, token: Token) -> bool {
        self.apply_pending();
        let before = self.sources.len();
        self.sources.retain(|s| s.token != token);
        self.sources.len() != before
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn apply_pending(&mut self) {
        let (added, removed) = {
            let mut pending = self.pending.borrow_mut();
            (
                std::mem::take(&mut pending.added),
                std::mem::take(&mut pending.removed),
            )
        };
        self.sources.extend(added);
        if !removed.is_empty() {
            self.sources.retain(|s| !removed.contains(&s.token));
        }
    }

    /// 阻塞等待（`None` 表示无限等待），然后分发所有就绪的描述符。
    ///
    /// 返回本轮调用的回调数量。超时、被信号打断或虚假唤醒都返回 `Ok(0)`；
    /// 其它 poll 错误返回 `Error::Poll`，由调用方决定是否退出主循环。
    /// 没有任何注册描述符时立即返回，避免永久阻塞。
    /// 本轮回调通过句柄做的增删不影响本轮，下一次调用时生效。
    pub fn poll(&mut self, data: &mut D, timeout: Option<Duration>) -> Result<usize> {
        self.apply_pending();
        if self.sources.is_empty() {
            return Ok(0);
        }

        let mut fds: Vec<libc::pollfd> = self
            .sources
            .iter()
            .map(|s| libc::pollfd {
                fd: s.fd,
                events: s.interest.bits(),
                revents: 0,
            })
            .collect();

        let timeout_ms = match timeout {
            None => -1,
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        // SAFETY: fds 是长度正确、在调用期间一直存活的 pollfd 数组
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::Poll(err));
        }
        if ret == 0 {
            return Ok(0);
        }

        let mut dispatched = 0;
        let mut removed = Vec::new();
        for (source, pfd) in self.sources.iter_mut().zip(&fds) {
            let readiness = Readiness::from_bits_truncate(pfd.revents);
            if readiness.is_empty() {
                continue;
            }
            dispatched += 1;
            if (source.callback)(source.fd, readiness, data) == PostAction::Remove {
                removed.push(source.token);
            }
        }

        if !removed.is_empty() {
            self.sources.retain(|s| !removed.contains(&s.token));
        }
        Ok(dispatched)
    }
}
