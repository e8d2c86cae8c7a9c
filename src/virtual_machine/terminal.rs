//! Single-byte console input without line buffering or echo.
//!
//! [`read_raw_byte`] is the only platform-specific piece of the VM. On Unix
//! the terminal is switched to non-canonical, no-echo mode for the duration of
//! one read and restored afterwards; when stdin is not a terminal the byte is
//! read as-is.

use std::io;

/// Blocks until one byte is available on stdin and returns it.
///
/// End of input is reported as [`io::ErrorKind::UnexpectedEof`].
#[cfg(unix)]
pub fn read_raw_byte() -> io::Result<u8> {
    let fd = libc::STDIN_FILENO;
    let mut original = std::mem::MaybeUninit::<libc::termios>::uninit();

    // SAFETY: `original` is a valid out-pointer for one `termios`.
    if unsafe { libc::tcgetattr(fd, original.as_mut_ptr()) } != 0 {
        // not a terminal (pipe, file): nothing to switch
        return read_fd_byte(fd);
    }
    // SAFETY: tcgetattr succeeded and fully initialized the struct.
    let original = unsafe { original.assume_init() };

    let mut raw = original;
    raw.c_lflag &= !(libc::ICANON | libc::ECHO);
    raw.c_cc[libc::VMIN] = 1;
    raw.c_cc[libc::VTIME] = 0;

    // SAFETY: `raw` is a valid termios derived from the current settings.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let _restore = RestoreTermios { fd, original };

    read_fd_byte(fd)
}

/// Puts the terminal back the way it was, even if the read fails.
#[cfg(unix)]
struct RestoreTermios {
    fd: libc::c_int,
    original: libc::termios,
}

#[cfg(unix)]
impl Drop for RestoreTermios {
    fn drop(&mut self) {
        // SAFETY: `original` came from tcgetattr on the same descriptor.
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.original);
        }
    }
}

/// Unbuffered read of exactly one byte from `fd`.
#[cfg(unix)]
fn read_fd_byte(fd: libc::c_int) -> io::Result<u8> {
    let mut byte = 0u8;
    loop {
        // SAFETY: the buffer is one valid, writable byte.
        let n = unsafe { libc::read(fd, (&mut byte as *mut u8).cast(), 1) };
        match n {
            1 => return Ok(byte),
            0 => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(windows)]
unsafe extern "C" {
    fn _getch() -> std::ffi::c_int;
}

/// Blocks until a key is pressed and returns it. `_getch` never echoes.
#[cfg(windows)]
pub fn read_raw_byte() -> io::Result<u8> {
    // SAFETY: `_getch` takes no arguments and is provided by the C runtime.
    let ch = unsafe { _getch() };
    if ch < 0 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(ch as u8)
}

/// Fallback for targets without a raw terminal API.
#[cfg(not(any(unix, windows)))]
pub fn read_raw_byte() -> io::Result<u8> {
    use std::io::Read;

    let mut byte = [0u8; 1];
    io::stdin().read_exact(&mut byte)?;
    Ok(byte[0])
}
