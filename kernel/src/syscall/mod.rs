// SPDX-License-Identifier: MPL-2.0

//! The system-call surface.
//!
//! Handles are opaque 64-bit identifiers in the calling process's handle
//! table; every pointer argument is validated as a user-mode pointer before
//! use. A failed call returns its error code; success returns zero.

mod object;
mod validation;

pub use object::{ObjectHandle, ObjectProperties};
pub use validation::check_user_range;

use validation::{read_user_string, user_slice, user_slice_mut};

use crate::arch::{set_tls_register, TlsRegister};
use crate::error::result_to_code;
use crate::ipc::{self, BasicMessage};
use crate::mm;
use crate::obj::downcast_object;
use crate::prelude::*;
use crate::sync::{futex_wait, futex_wake, Mutex, Semaphore};
use crate::task::{self, MemInfo, Process, Thread};
use crate::time::{self, ClockFields};
use crate::tree::Branch;

/// Maximum length accepted by the debug-output call.
const DEBUG_OUTPUT_LIMIT: u64 = 1024;

/// The system-call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    DebugOutput = 0,

    ObjectOpen = 1,
    ObjectClose = 2,
    ObjectCreate = 3,
    ObjectSeek = 4,
    ObjectRead = 5,
    ObjectWrite = 6,
    ObjectGetSize = 7,
    ObjectSetSize = 8,
    ObjectRename = 9,
    ObjectDelete = 10,
    ObjectProperties = 11,
    ObjectEnumChildren = 12,

    MessageRegister = 13,
    MessageSend = 14,
    MessageReceiveDetails = 15,
    MessageReceiveBody = 16,
    MessageComplete = 17,

    ProcessCreate = 18,
    ProcessStart = 19,
    ProcessStop = 20,
    ProcessDestroy = 21,
    ProcessExit = 22,
    ThreadCreate = 23,
    ThreadStart = 24,
    ThreadStop = 25,
    ThreadDestroy = 26,
    SetTlsBase = 27,

    MemAllocate = 28,
    MemRelease = 29,
    MemMap = 30,
    MemUnmap = 31,

    WaitForObject = 32,
    FutexOp = 33,
    MutexCreate = 34,
    MutexRelease = 35,
    SemaphoreCreate = 36,
    SemaphoreSignal = 37,

    GetSystemClock = 38,
    SleepThread = 39,
    Yield = 40,
}

impl SyscallNumber {
    fn from_raw(raw: u64) -> Option<SyscallNumber> {
        if raw > SyscallNumber::Yield as u64 {
            return None;
        }
        // The enum is dense from zero.
        Some(unsafe { core::mem::transmute::<u64, SyscallNumber>(raw) })
    }
}

/// A mutex exposed to user mode by handle.
pub struct SyscallMutex {
    pub mutex: Mutex,
}

crate::impl_handled_object!(SyscallMutex);

/// A semaphore exposed to user mode by handle.
pub struct SyscallSemaphore {
    pub semaphore: Semaphore,
}

crate::impl_handled_object!(SyscallSemaphore);

/// The system-call entry: decodes the number and returns the result code.
pub fn dispatch(number: u64, args: &[u64; 6]) -> u64 {
    let Some(call) = SyscallNumber::from_raw(number) else {
        return Error::SyscallInvalidIdx.code();
    };
    result_to_code(handle_call(call, args))
}

fn current_process() -> Arc<Process> {
    task::current_thread().process().clone()
}

fn handle_call(call: SyscallNumber, args: &[u64; 6]) -> Result {
    match call {
        SyscallNumber::DebugOutput => debug_output(args[0], args[1]),

        SyscallNumber::ObjectOpen => {
            let path = unsafe { read_user_string(args[0], args[1])? };
            let handle_out = args[2];
            let obj = ObjectHandle::open(&path)?;
            let handle = current_process().handles().store(obj)?;
            write_user_u64(handle_out, handle)
        }
        SyscallNumber::ObjectClose => current_process().handles().release(args[0]),
        SyscallNumber::ObjectCreate => {
            let path = unsafe { read_user_string(args[0], args[1])? };
            let obj = ObjectHandle::create(&path)?;
            let handle = current_process().handles().store(obj)?;
            write_user_u64(args[2], handle)
        }
        SyscallNumber::ObjectSeek => {
            object_handle(args[0])?.seek(args[1]);
            Ok(())
        }
        SyscallNumber::ObjectRead => {
            let obj = object_handle(args[0])?;
            let buffer = unsafe { user_slice_mut(args[1], args[2])? };
            let read = obj.read(buffer)?;
            write_user_u64(args[3], read)
        }
        SyscallNumber::ObjectWrite => {
            let obj = object_handle(args[0])?;
            let buffer = unsafe { user_slice(args[1], args[2])? };
            let written = obj.write(buffer)?;
            write_user_u64(args[3], written)
        }
        SyscallNumber::ObjectGetSize => {
            let size = object_handle(args[0])?.size()?;
            write_user_u64(args[1], size)
        }
        SyscallNumber::ObjectSetSize => object_handle(args[0])?.set_size(args[1]),
        SyscallNumber::ObjectRename => {
            let old_path = unsafe { read_user_string(args[0], args[1])? };
            let new_path = unsafe { read_user_string(args[2], args[3])? };
            crate::tree::root().rename_child(&old_path, &new_path)
        }
        SyscallNumber::ObjectDelete => {
            let path = unsafe { read_user_string(args[0], args[1])? };
            crate::tree::root().delete_child(&path)
        }
        SyscallNumber::ObjectProperties => {
            let props = object_handle(args[0])?.properties();
            check_user_range(args[1], core::mem::size_of::<ObjectProperties>() as u64)?;
            unsafe {
                core::ptr::write_unaligned(args[1] as *mut ObjectProperties, props);
            }
            Ok(())
        }
        SyscallNumber::ObjectEnumChildren => {
            let obj = object_handle(args[0])?;
            let start_from = unsafe { read_user_string(args[1], args[2])? };
            let names = obj.enum_children(&start_from, args[3])?;
            let buffer = unsafe { user_slice_mut(args[4], args[5])? };
            pack_names(&names, buffer);
            Ok(())
        }

        SyscallNumber::MessageRegister => {
            current_process().register_mailbox();
            Ok(())
        }
        SyscallNumber::MessageSend => {
            let target = downcast_object::<Process>(current_process().handles().get(args[0])?)?;
            let mailbox = target.mailbox().ok_or(Error::NotFound)?;
            let body = unsafe { user_slice(args[2], args[3])? };
            ipc::queue_message(mailbox, BasicMessage::new(args[1], body.to_vec()));
            Ok(())
        }
        SyscallNumber::MessageReceiveDetails => {
            let mailbox = current_process().mailbox().ok_or(Error::InvalidOp)?;
            let (id, len) = mailbox.next_message_details().ok_or(Error::NotFound)?;
            write_user_u64(args[0], id)?;
            write_user_u64(args[1], len)
        }
        SyscallNumber::MessageReceiveBody => {
            let mailbox = current_process().mailbox().ok_or(Error::InvalidOp)?;
            let buffer = unsafe { user_slice_mut(args[0], args[1])? };
            mailbox.receive_body(buffer).map(|_| ())
        }
        SyscallNumber::MessageComplete => {
            let mailbox = current_process().mailbox().ok_or(Error::InvalidOp)?;
            mailbox.complete_message()
        }

        SyscallNumber::ProcessCreate => {
            let entry = args[0];
            let kernel_mode = false;
            let process = task::create_process(
                move || crate::arch::x86_64::enter_user_mode(entry),
                kernel_mode,
                MemInfo::default(),
            );
            let handle = current_process().handles().store(process)?;
            write_user_u64(args[1], handle)
        }
        SyscallNumber::ProcessStart => {
            downcast_object::<Process>(current_process().handles().get(args[0])?)?.start();
            Ok(())
        }
        SyscallNumber::ProcessStop => {
            downcast_object::<Process>(current_process().handles().get(args[0])?)?.stop();
            Ok(())
        }
        SyscallNumber::ProcessDestroy => {
            downcast_object::<Process>(current_process().handles().get(args[0])?)?
                .destroy(args[1]);
            Ok(())
        }
        SyscallNumber::ProcessExit => {
            let process = current_process();
            process.add_to_dead_list();
            process.stop();
            task::yield_now();
            Ok(())
        }
        SyscallNumber::ThreadCreate => {
            let entry = args[0];
            let thread = current_process()
                .create_thread(Box::new(move || crate::arch::x86_64::enter_user_mode(entry)));
            let handle = current_process().handles().store(thread)?;
            write_user_u64(args[1], handle)
        }
        SyscallNumber::ThreadStart => {
            downcast_object::<Thread>(current_process().handles().get(args[0])?)?.start();
            Ok(())
        }
        SyscallNumber::ThreadStop => {
            downcast_object::<Thread>(current_process().handles().get(args[0])?)?.stop();
            Ok(())
        }
        SyscallNumber::ThreadDestroy => {
            downcast_object::<Thread>(current_process().handles().get(args[0])?)?.destroy();
            Ok(())
        }
        SyscallNumber::SetTlsBase => {
            let register = match args[0] {
                0 => TlsRegister::Fs,
                1 => TlsRegister::Gs,
                _ => return Err(Error::InvalidParam),
            };
            set_tls_register(register, args[1])
        }

        SyscallNumber::MemAllocate => {
            if args[0] == 0 {
                return Err(Error::InvalidParam);
            }
            let ptr = mm::kmalloc(args[0] as usize);
            let addr = ptr.as_ptr() as u64;
            current_process()
                .address_space()
                .lock()
                .allocations
                .insert(addr, args[0]);
            write_user_u64(args[1], addr)
        }
        SyscallNumber::MemRelease => {
            let removed = current_process()
                .address_space()
                .lock()
                .allocations
                .remove(&args[0]);
            match removed {
                Some(_) => {
                    unsafe { mm::kfree(core::ptr::NonNull::new_unchecked(args[0] as *mut u8)) };
                    Ok(())
                }
                None => Err(Error::NotFound),
            }
        }
        SyscallNumber::MemMap => {
            check_user_range(args[0], args[1])?;
            let process = current_process();
            let mut space = process.address_space().lock();
            if space.mappings.contains_key(&args[0]) {
                return Err(Error::AlreadyExists);
            }
            space.mappings.insert(args[0], args[1]);
            Ok(())
        }
        SyscallNumber::MemUnmap => {
            current_process()
                .address_space()
                .lock()
                .mappings
                .remove(&args[0])
                .map(|_| ())
                .ok_or(Error::NotFound)
        }

        SyscallNumber::WaitForObject => {
            let obj = current_process().handles().get(args[0])?;
            let timeout_us = args[1];
            if let Ok(mutex) = downcast_object::<SyscallMutex>(obj.clone()) {
                return match mutex.mutex.timed_lock(timeout_us) {
                    true => Ok(()),
                    false => Err(Error::OutOfRange),
                };
            }
            if let Ok(semaphore) = downcast_object::<SyscallSemaphore>(obj) {
                return match semaphore.semaphore.timed_wait(timeout_us) {
                    true => Ok(()),
                    false => Err(Error::OutOfRange),
                };
            }
            Err(Error::InvalidOp)
        }
        SyscallNumber::FutexOp => {
            check_user_range(args[1], 4)?;
            let addr = args[1] as *const i32;
            match args[0] {
                0 => unsafe { futex_wait(addr, args[2] as i32) },
                1 => futex_wake(addr),
                _ => Err(Error::InvalidParam),
            }
        }
        SyscallNumber::MutexCreate => {
            let recursive = args[0] != 0;
            let handle = current_process().handles().store(Arc::new(SyscallMutex {
                mutex: Mutex::new(recursive),
            }))?;
            write_user_u64(args[1], handle)
        }
        SyscallNumber::MutexRelease => {
            downcast_object::<SyscallMutex>(current_process().handles().get(args[0])?)?
                .mutex
                .unlock();
            Ok(())
        }
        SyscallNumber::SemaphoreCreate => {
            if args[0] == 0 || args[1] > args[0] {
                return Err(Error::InvalidParam);
            }
            let handle = current_process()
                .handles()
                .store(Arc::new(SyscallSemaphore {
                    semaphore: Semaphore::new(args[0], args[1]),
                }))?;
            write_user_u64(args[2], handle)
        }
        SyscallNumber::SemaphoreSignal => {
            downcast_object::<SyscallSemaphore>(current_process().handles().get(args[0])?)?
                .semaphore
                .clear();
            Ok(())
        }

        SyscallNumber::GetSystemClock => {
            check_user_range(args[0], core::mem::size_of::<ClockFields>() as u64)?;
            let fields = time::wall_clock();
            unsafe {
                core::ptr::write_unaligned(args[0] as *mut ClockFields, fields);
            }
            Ok(())
        }
        SyscallNumber::SleepThread => {
            task::sleep_ns(args[0]);
            Ok(())
        }
        SyscallNumber::Yield => {
            task::yield_now();
            Ok(())
        }
    }
}

fn debug_output(ptr: u64, len: u64) -> Result {
    if len > DEBUG_OUTPUT_LIMIT {
        return Err(Error::InvalidParam);
    }
    let bytes = unsafe { user_slice(ptr, len)? };
    for chunk in bytes.split(|&b| b == b'\n') {
        if !chunk.is_empty() {
            log::info!("[user] {}", String::from_utf8_lossy(chunk));
        }
    }
    Ok(())
}

fn object_handle(handle: u64) -> Result<Arc<ObjectHandle>> {
    downcast_object::<ObjectHandle>(current_process().handles().get(handle)?)
}

fn write_user_u64(ptr: u64, value: u64) -> Result {
    check_user_range(ptr, 8)?;
    unsafe { core::ptr::write_unaligned(ptr as *mut u64, value) };
    Ok(())
}

/// Packs names into `buffer` as NUL-terminated strings; returns how many
/// fitted.
fn pack_names(names: &[String], buffer: &mut [u8]) -> u64 {
    let mut offset = 0usize;
    let mut packed = 0u64;
    for name in names {
        let needed = name.len() + 1;
        if offset + needed > buffer.len() {
            break;
        }
        buffer[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        buffer[offset + name.len()] = 0;
        offset += needed;
        packed += 1;
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(n: SyscallNumber, args: [u64; 6]) -> u64 {
        dispatch(n as u64, &args)
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        crate::init();
        assert_eq!(
            dispatch(10_000, &[0; 6]),
            Error::SyscallInvalidIdx.code()
        );
    }

    #[test]
    fn debug_output_validates_its_arguments() {
        crate::init();
        let text = b"hello from user mode";
        assert_eq!(
            call(
                SyscallNumber::DebugOutput,
                [text.as_ptr() as u64, text.len() as u64, 0, 0, 0, 0]
            ),
            0
        );
        // Too long.
        assert_eq!(
            call(SyscallNumber::DebugOutput, [text.as_ptr() as u64, 4096, 0, 0, 0, 0]),
            Error::InvalidParam.code()
        );
        // Null pointer.
        assert_eq!(
            call(SyscallNumber::DebugOutput, [0, 4, 0, 0, 0, 0]),
            Error::InvalidParam.code()
        );
    }

    #[test]
    fn tree_objects_are_reachable_by_handle() {
        crate::init();
        crate::tree::root().create_child("\\syscall_test_dir").unwrap();

        let path = b"\\syscall_test_dir";
        let mut handle: u64 = 0;
        assert_eq!(
            call(
                SyscallNumber::ObjectOpen,
                [
                    path.as_ptr() as u64,
                    path.len() as u64,
                    &mut handle as *mut u64 as u64,
                    0,
                    0,
                    0
                ]
            ),
            0
        );
        assert_ne!(handle, 0);

        let mut props = ObjectProperties::default();
        assert_eq!(
            call(
                SyscallNumber::ObjectProperties,
                [handle, &mut props as *mut ObjectProperties as u64, 0, 0, 0, 0]
            ),
            0
        );
        assert_eq!(props.is_branch, 1);

        assert_eq!(call(SyscallNumber::ObjectClose, [handle, 0, 0, 0, 0, 0]), 0);
        assert_eq!(
            call(SyscallNumber::ObjectClose, [handle, 0, 0, 0, 0, 0]),
            Error::NotFound.code()
        );
    }

    #[test]
    fn mutex_and_semaphore_handles() {
        crate::init();

        let mut mutex_handle: u64 = 0;
        assert_eq!(
            call(
                SyscallNumber::MutexCreate,
                [0, &mut mutex_handle as *mut u64 as u64, 0, 0, 0, 0]
            ),
            0
        );
        assert_eq!(
            call(SyscallNumber::WaitForObject, [mutex_handle, 0, 0, 0, 0, 0]),
            0
        );
        assert_eq!(
            call(SyscallNumber::MutexRelease, [mutex_handle, 0, 0, 0, 0, 0]),
            0
        );

        let mut sem_handle: u64 = 0;
        assert_eq!(
            call(
                SyscallNumber::SemaphoreCreate,
                [2, 0, &mut sem_handle as *mut u64 as u64, 0, 0, 0]
            ),
            0
        );
        // Two slots available, a third try-wait fails.
        assert_eq!(call(SyscallNumber::WaitForObject, [sem_handle, 0, 0, 0, 0, 0]), 0);
        assert_eq!(call(SyscallNumber::WaitForObject, [sem_handle, 0, 0, 0, 0, 0]), 0);
        assert_eq!(
            call(SyscallNumber::WaitForObject, [sem_handle, 0, 0, 0, 0, 0]),
            Error::OutOfRange.code()
        );
        assert_eq!(
            call(SyscallNumber::SemaphoreSignal, [sem_handle, 0, 0, 0, 0, 0]),
            0
        );
    }

    #[test]
    fn memory_bookkeeping_round_trip() {
        crate::init();

        let mut addr: u64 = 0;
        assert_eq!(
            call(
                SyscallNumber::MemAllocate,
                [256, &mut addr as *mut u64 as u64, 0, 0, 0, 0]
            ),
            0
        );
        assert_ne!(addr, 0);
        assert_eq!(call(SyscallNumber::MemRelease, [addr, 0, 0, 0, 0, 0]), 0);
        assert_eq!(
            call(SyscallNumber::MemRelease, [addr, 0, 0, 0, 0, 0]),
            Error::NotFound.code()
        );

        assert_eq!(call(SyscallNumber::MemMap, [0x4000_0000, 4096, 0, 0, 0, 0]), 0);
        assert_eq!(
            call(SyscallNumber::MemMap, [0x4000_0000, 4096, 0, 0, 0, 0]),
            Error::AlreadyExists.code()
        );
        assert_eq!(call(SyscallNumber::MemUnmap, [0x4000_0000, 0, 0, 0, 0, 0]), 0);
    }

    #[test]
    fn clock_fields_are_written_back() {
        crate::init();
        let mut fields = ClockFields::default();
        assert_eq!(
            call(
                SyscallNumber::GetSystemClock,
                [&mut fields as *mut ClockFields as u64, 0, 0, 0, 0, 0]
            ),
            0
        );
        assert!(fields.year >= 2020);
    }
}
