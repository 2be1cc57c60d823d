// SPDX-License-Identifier: MPL-2.0

//! Interrupt routing.
//!
//! Drivers register receivers by IRQ number. An interrupt is first offered to
//! every registered fast handler in interrupt context; any handler asking for
//! slow handling gets called again on a worker thread, with interrupts
//! enabled, via the work queue.

use crate::ipc::{self, Mailbox, Message, MessageHeader, MessageReceiver, SM_IRQ_SLOW};
use crate::prelude::*;

/// Outcome of a fast (interrupt-context) handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqFastResult {
    /// The interrupt was not raised by this device.
    NotForMe,
    /// Fully dealt with in the fast path.
    Handled,
    /// Claimed, but the slow path must run as well.
    NeedsSlowPath,
}

/// A device that handles interrupts.
pub trait IrqReceiver: Send + Sync {
    /// Runs in interrupt context with interrupts disabled; must not block.
    fn handle_irq_fast(&self, irq: u8) -> IrqFastResult;

    /// Runs in worker-thread context with interrupts enabled.
    fn handle_irq_slow(&self, irq: u8);
}

fn handler_table() -> &'static SpinLock<BTreeMap<u8, Vec<Arc<dyn IrqReceiver>>>> {
    static HANDLERS: SpinLock<BTreeMap<u8, Vec<Arc<dyn IrqReceiver>>>> =
        SpinLock::new(BTreeMap::new());
    &HANDLERS
}

/// Registers `handler` for `irq`. Multiple handlers may share a line.
pub fn register_irq_handler(irq: u8, handler: Arc<dyn IrqReceiver>) {
    handler_table().lock().entry(irq).or_default().push(handler);
}

/// Routes one interrupt: fast handlers first, then the slow path on a worker
/// thread for every handler that requested it. An unclaimed line is not
/// fatal.
pub fn dispatch_irq(irq: u8) {
    let handlers: Vec<Arc<dyn IrqReceiver>> = handler_table()
        .lock()
        .get(&irq)
        .cloned()
        .unwrap_or_default();

    let mut claimed = false;
    for handler in handlers {
        match handler.handle_irq_fast(irq) {
            IrqFastResult::NotForMe => (),
            IrqFastResult::Handled => claimed = true,
            IrqFastResult::NeedsSlowPath => {
                claimed = true;
                let msg = Box::new(IrqSlowMessage {
                    header: MessageHeader::new(SM_IRQ_SLOW),
                    irq,
                    target: handler.clone(),
                });
                ipc::queue_message(slow_dispatcher().clone(), msg);
            }
        }
    }

    if !claimed {
        log::debug!("IRQ {irq} not claimed by any handler");
    }
}

/// The message carrying a deferred slow-path invocation.
struct IrqSlowMessage {
    header: MessageHeader,
    irq: u8,
    target: Arc<dyn IrqReceiver>,
}

crate::impl_message!(IrqSlowMessage);

/// Singleton receiver that runs slow handlers on worker threads.
struct IrqSlowDispatch {
    mailbox: Mailbox,
}

impl MessageReceiver for IrqSlowDispatch {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn handle_message(&self, msg: Box<dyn Message>) {
        match msg.header().id {
            SM_IRQ_SLOW => {
                if let Some(slow) = ipc::convert_message::<IrqSlowMessage>(msg) {
                    slow.target.handle_irq_slow(slow.irq);
                }
            }
            other => ipc::unknown_message(other),
        }
    }
}

fn slow_dispatcher() -> &'static Arc<dyn MessageReceiver> {
    static DISPATCH: spin::Once<Arc<dyn MessageReceiver>> = spin::Once::new();
    DISPATCH.call_once(|| {
        Arc::new(IrqSlowDispatch {
            mailbox: Mailbox::new(),
        })
    })
}
