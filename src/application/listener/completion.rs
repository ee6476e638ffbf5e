// Completion-driven backend: pre-posted accepts, one per slot, re-armed
// through the reactor after every completion.
use crate::application::listener::{Flags, ListenerCore, RearmPolicy};
use crate::common::constants::ADDRESS_PADDING;
use crate::common::error::{ListenerError, Result};
use crate::core::iocp::{AcceptCompletion, AcceptRequest, CompletionPort, Overlapped, PostResult};
use crate::core::net::addr::address_len;
use crate::core::net::socket::is_accept_retriable;
use crate::core::net::Socket;
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No request outstanding.
    Idle,
    /// Exactly one accept request is posted.
    Pending,
    /// Gave up after repeated setup failures.
    Abandoned,
}

/// One pre-allocated accept operation: a candidate socket plus a scratch
/// buffer holding the local and remote address.
pub(crate) struct AcceptingSlot {
    index: usize,
    core: Weak<ListenerCore>,
    state: Cell<SlotState>,
    candidate: RefCell<Option<Socket>>,
    buffer: RefCell<Option<Vec<u8>>>,
    buffer_len: usize,
    failures: Cell<u32>,
}

impl AcceptingSlot {
    fn new(index: usize, core: Weak<ListenerCore>, buffer_len: usize) -> Rc<Self> {
        Rc::new(Self {
            index,
            core,
            state: Cell::new(SlotState::Idle),
            candidate: RefCell::new(None),
            buffer: RefCell::new(Some(vec![0u8; buffer_len])),
            buffer_len,
            failures: Cell::new(0),
        })
    }

    /// The buffer travels with the request; a fresh one is allocated if the
    /// port kept the old one.
    fn take_buffer(&self) -> Vec<u8> {
        self.buffer
            .borrow_mut()
            .take()
            .unwrap_or_else(|| vec![0u8; self.buffer_len])
    }

    fn restore_buffer(&self, mut buffer: Vec<u8>) {
        if buffer.len() == self.buffer_len {
            buffer.fill(0);
            *self.buffer.borrow_mut() = Some(buffer);
        }
    }
}

impl Overlapped for AcceptingSlot {
    fn complete(self: Rc<Self>, completion: AcceptCompletion) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        if let Some(backend) = core.completion() {
            backend.on_complete(&core, &self, completion);
        }
    }
}

pub(crate) struct CompletionBackend {
    fd: RawFd,
    family: libc::c_int,
    socket: RefCell<Option<Socket>>,
    port: Rc<dyn CompletionPort>,
    slots: RefCell<Vec<Rc<AcceptingSlot>>>,
    enabled: Cell<bool>,
    policy: RearmPolicy,
}

impl CompletionBackend {
    pub(crate) fn new(
        core: &Rc<ListenerCore>,
        socket: Socket,
        port: Rc<dyn CompletionPort>,
        slots: usize,
        policy: RearmPolicy,
    ) -> Result<Self> {
        if slots == 0 {
            return Err(ListenerError::Config(
                "at least one accepting slot is required".to_string(),
            ));
        }
        let family = socket.local_addr()?.family();
        let addr_len = address_len(family).ok_or(ListenerError::UnsupportedFamily(family))?;
        let buffer_len = (addr_len + ADDRESS_PADDING) * 2;

        let slots = (0..slots)
            .map(|i| AcceptingSlot::new(i, Rc::downgrade(core), buffer_len))
            .collect();

        Ok(Self {
            fd: socket.as_raw_fd(),
            family,
            socket: RefCell::new(Some(socket)),
            port,
            slots: RefCell::new(slots),
            enabled: Cell::new(false),
            policy,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|s| s.state.get() != SlotState::Abandoned)
            .count()
    }

    pub(crate) fn slot_states(&self) -> Vec<SlotState> {
        self.slots.borrow().iter().map(|s| s.state.get()).collect()
    }

    /// Posts a request on every idle slot. Fails, and stays disabled, only
    /// if none could be posted; otherwise the slots that failed are retried
    /// per the rearm policy.
    pub(crate) fn enable(&self, core: &ListenerCore) -> Result<()> {
        if self.enabled.replace(true) {
            return Ok(());
        }

        let slots = self.slots.borrow().clone();
        let mut started = 0;
        let mut failed = Vec::new();
        for slot in &slots {
            // A completion handled inline may have disabled us.
            if !self.enabled.get() || core.is_destroyed() {
                break;
            }
            if slot.state.get() != SlotState::Idle {
                continue;
            }
            slot.failures.set(0);
            match self.start_accepting(core, slot) {
                Ok(()) => started += 1,
                Err(e) => failed.push((slot, e)),
            }
        }

        if started == 0 && !failed.is_empty() {
            self.enabled.set(false);
            let count = failed.len();
            let (_, first) = failed.swap_remove(0);
            core.diagnostics().warn(&format!(
                "Couldn't start accepting on fd {}: {} slot(s) failed to post: {}",
                self.fd, count, first
            ));
            return Err(first);
        }

        for (slot, e) in &failed {
            self.slot_failed(core, slot, e);
        }
        Ok(())
    }

    /// Cancels outstanding requests. Slots stay allocated.
    pub(crate) fn disable(&self) -> Result<()> {
        if !self.enabled.replace(false) {
            return Ok(());
        }
        self.port.cancel(self.fd);
        for slot in self.slots.borrow().iter() {
            if slot.state.get() == SlotState::Pending {
                self.reset_slot(slot);
            }
        }
        Ok(())
    }

    pub(crate) fn destroy(&self) -> Option<Socket> {
        let _ = self.disable();
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        for slot in &slots {
            self.reset_slot(slot);
        }
        drop(slots);
        self.port.release(self.fd);
        self.socket.borrow_mut().take()
    }

    fn reset_slot(&self, slot: &AcceptingSlot) {
        if let Some(candidate) = slot.candidate.borrow_mut().take() {
            self.port.release(candidate.as_raw_fd());
        }
        if slot.state.get() == SlotState::Pending {
            slot.state.set(SlotState::Idle);
        }
    }

    fn prepare_candidate(&self, core: &ListenerCore, slot: &AcceptingSlot) -> Result<Socket> {
        let candidate = Socket::new(self.family)?;
        let fd = candidate.as_raw_fd();

        let prepared = self
            .port
            .update_accept_context(fd, self.fd)
            .map_err(|source| ListenerError::Configure {
                option: "accept context",
                source,
            })
            .and_then(|_| {
                if core.flags().contains(Flags::LEAVE_SOCKETS_BLOCKING) {
                    Ok(())
                } else {
                    candidate.set_non_blocking()
                }
            })
            .and_then(|_| {
                self.port
                    .associate(fd, slot.index)
                    .map_err(|source| ListenerError::Configure {
                        option: "completion port",
                        source,
                    })
            });

        match prepared {
            Ok(()) => Ok(candidate),
            Err(e) => {
                self.port.release(fd);
                Err(e)
            }
        }
    }

    /// Creates a candidate socket for `slot` and posts an accept with it.
    /// A request the port finishes on the spot is handled before returning.
    fn start_accepting(&self, core: &ListenerCore, slot: &Rc<AcceptingSlot>) -> Result<()> {
        let candidate = self.prepare_candidate(core, slot)?;
        let request = AcceptRequest {
            listener: self.fd,
            candidate: candidate.as_raw_fd(),
            buffer: slot.take_buffer(),
        };
        *slot.candidate.borrow_mut() = Some(candidate);
        slot.state.set(SlotState::Pending);

        let token: Rc<dyn Overlapped> = slot.clone();
        match self.port.post_accept(request, token) {
            PostResult::Completed(completion) => {
                self.on_complete(core, slot, completion);
                Ok(())
            }
            PostResult::Pending => Ok(()),
            PostResult::Failed(source, buffer) => {
                slot.restore_buffer(buffer);
                self.reset_slot(slot);
                Err(ListenerError::Backend(format!(
                    "accept could not be posted on slot {}: {}",
                    slot.index, source
                )))
            }
        }
    }

    fn on_complete(&self, core: &ListenerCore, slot: &Rc<AcceptingSlot>, completion: AcceptCompletion) {
        let AcceptCompletion { buffer, result } = completion;
        let accepted = slot.candidate.borrow_mut().take();
        if let Some(socket) = &accepted {
            self.port.release(socket.as_raw_fd());
        }
        if slot.state.get() == SlotState::Pending {
            slot.state.set(SlotState::Idle);
        }

        match result {
            Ok(()) => {
                let addresses = self.port.split_addresses(&buffer);
                slot.restore_buffer(buffer);
                slot.failures.set(0);
                match (accepted, addresses) {
                    (Some(socket), Ok((_local, remote))) => core.dispatch(socket, remote),
                    (Some(_), Err(e)) => core.diagnostics().warn(&format!(
                        "Couldn't read addresses of connection accepted on fd {}: {}",
                        self.fd, e
                    )),
                    (None, _) => core.diagnostics().warn(&format!(
                        "Accept completed on slot {} without a candidate socket",
                        slot.index
                    )),
                }
                self.schedule_rearm(core, slot, None);
            }
            Err(e) if is_accept_retriable(&e) => {
                slot.restore_buffer(buffer);
                self.schedule_rearm(core, slot, None);
            }
            Err(e) => {
                slot.restore_buffer(buffer);
                core.diagnostics().warn(&format!(
                    "Error from accept() call on fd {} (slot {}): {}",
                    self.fd, slot.index, e
                ));
                self.slot_failed(core, slot, &ListenerError::Io(e));
            }
        }
    }

    /// Re-posting goes through the reactor so a run of connections that
    /// complete immediately does not grow the stack.
    fn schedule_rearm(&self, core: &ListenerCore, slot: &Rc<AcceptingSlot>, delay: Option<Duration>) {
        let core_ref = core.weak();
        let slot_ref = Rc::downgrade(slot);
        let task = move || {
            let (core, slot) = match (core_ref.upgrade(), slot_ref.upgrade()) {
                (Some(core), Some(slot)) => (core, slot),
                _ => return,
            };
            if let Some(backend) = core.completion() {
                backend.rearm(&core, &slot);
            }
        };
        match delay {
            Some(delay) => core.reactor().defer_after(delay, task),
            None => core.reactor().defer(task),
        }
    }

    fn rearm(&self, core: &ListenerCore, slot: &Rc<AcceptingSlot>) {
        if !self.enabled.get() || core.is_destroyed() || slot.state.get() != SlotState::Idle {
            return;
        }
        if let Err(e) = self.start_accepting(core, slot) {
            self.slot_failed(core, slot, &e);
        }
    }

    fn slot_failed(&self, core: &ListenerCore, slot: &Rc<AcceptingSlot>, err: &ListenerError) {
        let attempt = slot.failures.get() + 1;
        slot.failures.set(attempt);

        match self.policy.schedule().delay(attempt) {
            Some(delay) => {
                core.diagnostics().warn(&format!(
                    "Couldn't start accepting on slot {} (attempt {}): {}; retrying in {:?}",
                    slot.index, attempt, err, delay
                ));
                self.schedule_rearm(core, slot, Some(delay));
            }
            None => {
                slot.state.set(SlotState::Abandoned);
                core.diagnostics().warn(&format!(
                    "Abandoning accepting slot {} after {} failed attempts: {}; {} slot(s) left",
                    slot.index,
                    attempt,
                    err,
                    self.capacity()
                ));
            }
        }
    }
}
