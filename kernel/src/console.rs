/// Early console over the hypervisor's debug channel.
///
/// Output: boot diagnostics via console_println!
///
/// Everything printed during bring-up goes through the CONSOLEIO_write
/// hypercall; the ring console whose channel the handshake acquires is
/// owned by later code. Writes are batched in a small buffer so a
/// formatted line costs a handful of hypercalls, not one per byte.
use core::fmt;
use spin::Mutex;

use crate::xen::hypercall;

pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

pub struct Console {
    buf: [u8; 128],
    len: usize,
}

impl Console {
    pub const fn new() -> Self {
        Self {
            buf: [0; 128],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.buf[self.len] = byte;
        self.len += 1;
        if self.len == self.buf.len() {
            self.flush();
        }
    }

    /// Hand the buffered bytes to the hypervisor.
    pub fn flush(&mut self) {
        if self.len > 0 {
            hypercall::console_write(&self.buf[..self.len]);
            self.len = 0;
        }
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.push(b'\r');
            }
            self.push(byte);
        }
        Ok(())
    }
}

/// Print to the hypervisor console.
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {
        {
            use core::fmt::Write;
            let mut con = $crate::console::CONSOLE.lock();
            let _ = write!(con, $($arg)*);
            con.flush();
        }
    };
}

/// Print to the hypervisor console with a newline.
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => {
        $crate::console_print!("{}\n", format_args!($($arg)*))
    };
}
