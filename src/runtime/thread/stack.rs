use once_cell::sync::Lazy;
use std::{io, ptr};

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 && (size as usize).is_power_of_two() {
        size as usize
    } else {
        4096
    }
});

pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// An anonymous mapping used as a fiber stack.
///
/// With guard pages the usable region is bracketed by one inaccessible page
/// on each side, so running off either end faults instead of corrupting the
/// neighbouring memory.
pub struct Stack {
    mapping: *mut u8,
    mapping_len: usize,
    bottom: *mut u8,
    size: usize,
}

impl Stack {
    pub fn new(size: usize, guard_pages: bool) -> io::Result<Self> {
        let page = page_size();
        let size = size
            .checked_add(page - 1)
            .map(|s| s & !(page - 1))
            .filter(|s| *s > 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid stack size"))?;
        let guard = if guard_pages { page } else { 0 };
        let mapping_len = size
            .checked_add(2 * guard)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid stack size"))?;

        let prot = if guard_pages {
            libc::PROT_NONE
        } else {
            libc::PROT_READ | libc::PROT_WRITE
        };
        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_len,
                prot,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // dropped, and so unmapped, if the mprotect below fails
        let stack = Stack {
            mapping: mapping.cast(),
            mapping_len,
            bottom: unsafe { mapping.cast::<u8>().add(guard) },
            size,
        };
        if guard_pages
            && unsafe {
                libc::mprotect(
                    stack.bottom.cast(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            } != 0
        {
            return Err(io::Error::last_os_error());
        }
        Ok(stack)
    }

    /// Lowest usable address.
    pub fn bottom(&self) -> usize {
        self.bottom as usize
    }

    /// One past the highest usable address. Stacks grow down from here.
    pub fn top(&self) -> usize {
        self.bottom() + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.mapping.cast(), self.mapping_len);
        }
    }
}
