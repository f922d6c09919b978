//! The VM's raw argument buffer.
//!
//! Arguments are stored as 32-bit words in declaration order. 32-bit and
//! smaller values take one word; 64-bit values and addresses take two,
//! low word first. By-value objects are stored as the address of the VM's
//! copy.

use std::ffi::c_void;

/// Read-only view of an argument buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawArgs<'a> {
    words: &'a [u32],
}

impl<'a> RawArgs<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self { words }
    }

    pub fn empty() -> Self {
        Self { words: &[] }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    /// Read a one- or two-word value at `pos`.
    pub fn read(&self, pos: usize, words: usize) -> u64 {
        match words {
            1 => self.words[pos] as u64,
            _ => self.words[pos] as u64 | (self.words[pos + 1] as u64) << 32,
        }
    }

    /// Read an address stored at `pos`.
    pub fn address(&self, pos: usize) -> *const u8 {
        self.read(pos, 2) as usize as *const u8
    }
}

// =============================================================================
// Buffer builder
// =============================================================================

/// Builds an argument buffer the way the VM lays one out.
#[derive(Debug, Clone, Default)]
pub struct ArgBuffer {
    words: Vec<u32>,
}

impl ArgBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
        }
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.words.push(value as u32);
        self
    }

    pub fn push_i8(&mut self, value: i8) -> &mut Self {
        self.words.push(value as i32 as u32);
        self
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.words.push(value as u32);
        self
    }

    pub fn push_i16(&mut self, value: i16) -> &mut Self {
        self.words.push(value as i32 as u32);
        self
    }

    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.words.push(value as u32);
        self
    }

    pub fn push_i32(&mut self, value: i32) -> &mut Self {
        self.words.push(value as u32);
        self
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.words.push(value);
        self
    }

    pub fn push_i64(&mut self, value: i64) -> &mut Self {
        self.push_u64(value as u64)
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.words.push(value as u32);
        self.words.push((value >> 32) as u32);
        self
    }

    pub fn push_f32(&mut self, value: f32) -> &mut Self {
        self.words.push(value.to_bits());
        self
    }

    pub fn push_f64(&mut self, value: f64) -> &mut Self {
        self.push_u64(value.to_bits())
    }

    /// Push an address: a pointer, handle, reference, or by-value object.
    pub fn push_ptr<T>(&mut self, ptr: *const T) -> &mut Self {
        self.push_u64(ptr as usize as u64)
    }

    /// Push a by-value object; the VM passes the address of its copy.
    pub fn push_object<T>(&mut self, value: &T) -> &mut Self {
        self.push_ptr(value as *const T)
    }

    pub fn push_null(&mut self) -> &mut Self {
        self.push_ptr(std::ptr::null::<c_void>())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn as_raw(&self) -> RawArgs<'_> {
        RawArgs::new(&self.words)
    }
}
