// SPDX-License-Identifier: MPL-2.0

//! The architecture context saved across a task switch.

/// Callee-saved registers per the System V AMD64 ABI.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct CalleeRegs {
    pub rsp: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// The opaque per-thread context the scheduler switches between.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct TaskContext {
    pub regs: CalleeRegs,
    pub rip: u64,
}

impl TaskContext {
    pub const fn new() -> Self {
        Self {
            regs: CalleeRegs {
                rsp: 0,
                rbx: 0,
                rbp: 0,
                r12: 0,
                r13: 0,
                r14: 0,
                r15: 0,
            },
            rip: 0,
        }
    }

    /// Points the context at an entry function with a fresh stack top.
    ///
    /// The stack top must be 16-byte aligned with room reserved for the
    /// return address, per the ABI.
    pub fn prepare(&mut self, entry: usize, stack_top: usize) {
        self.rip = entry as u64;
        self.regs.rsp = (stack_top & !0xF) as u64 - 8;
    }
}

#[cfg(target_os = "none")]
core::arch::global_asm!(
    r#"
.text
.global azalea_context_switch
// azalea_context_switch(cur: *mut TaskContext in rdi, next: *const TaskContext in rsi)
azalea_context_switch:
    mov [rdi + 0x00], rsp
    mov [rdi + 0x08], rbx
    mov [rdi + 0x10], rbp
    mov [rdi + 0x18], r12
    mov [rdi + 0x20], r13
    mov [rdi + 0x28], r14
    mov [rdi + 0x30], r15
    lea rax, [rip + 1f]
    mov [rdi + 0x38], rax

    mov rsp, [rsi + 0x00]
    mov rbx, [rsi + 0x08]
    mov rbp, [rsi + 0x10]
    mov r12, [rsi + 0x18]
    mov r13, [rsi + 0x20]
    mov r14, [rsi + 0x28]
    mov r15, [rsi + 0x30]
    jmp [rsi + 0x38]
1:
    ret
"#
);

#[cfg(target_os = "none")]
extern "C" {
    /// Saves the current context into `cur` and resumes `next`.
    pub fn azalea_context_switch(cur: *mut TaskContext, next: *const TaskContext);
}
