use crate::BackgroundIoHandle;
use std::{
    io::Read,
    sync::{Arc, Mutex},
};

const READ_BUF_SZ: usize = 1024 * 128;

/// Drain `f` on a dedicated thread until EOF or a read error.
pub fn read_background<T: Read + Send + 'static>(mut f: T) -> BackgroundIoHandle {
    let buf = Arc::new(Mutex::new(Vec::with_capacity(4096)));
    let buf1 = Arc::clone(&buf);

    let reader = std::thread::spawn(move || {
        let buf = vec![0_u8; READ_BUF_SZ];
        let mut buf = buf.into_boxed_slice();

        while let Ok(sz) = f.read(&mut buf[..]) {
            if sz == 0 {
                break;
            }
            let mut shared_buf = buf1.lock().unwrap();
            shared_buf.extend(&buf[..sz]);
        }
    });

    BackgroundIoHandle::new(buf, reader)
}

#[cfg(test)]
mod tests {
    use super::read_background;
    use std::io::{self, Cursor, Read};

    #[test]
    fn drains_to_eof() {
        let data = b"compiler says no\n".repeat(10_000);
        let handle = read_background(Cursor::new(data.clone()));
        assert_eq!(handle.wait_finish(), data);
    }

    #[test]
    fn read_error_keeps_earlier_data() {
        let broken = Cursor::new(b"partial".to_vec()).chain(Broken);
        let handle = read_background(broken);
        assert_eq!(handle.wait_finish(), b"partial");
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }
}
