//! `ByteFile` backed by a real file on disk. This is the one leaf of the
//! byte-file tree that needs actual interior mutability — `std::fs::File`'s
//! `Read`/`Write`/`Seek` impls all take `&mut self`.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use crate::byte_file::{check_bounds, ByteFile, ByteFileRef};

pub struct DiskByteFile {
    file: RefCell<File>,
    file_size: usize,
}

impl DiskByteFile {
    pub fn new(file: File) -> std::io::Result<ByteFileRef> {
        let file_size = file.metadata()?.len() as usize;
        Ok(Rc::new(DiskByteFile { file: RefCell::new(file), file_size }))
    }
}

impl ByteFile for DiskByteFile {
    fn file_size(&self) -> usize {
        self.file_size
    }

    fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        check_bounds(offset, size, self.file_size);
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset as u64)).expect("seek failed");
        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf).expect("read failed");
        buf
    }

    fn write(&self, offset: usize, data: &[u8]) {
        check_bounds(offset, data.len(), self.file_size);
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset as u64)).expect("seek failed");
        file.write_all(data).expect("write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reads_back_what_was_written_through_tempfile() {
        let mut tmp = tempfile::tempfile().unwrap();
        tmp.write_all(&[0u8; 32]).unwrap();
        let file = DiskByteFile::new(tmp).unwrap();
        file.write(4, &[1, 2, 3, 4]);
        assert_eq!(file.read(4, 4), vec![1, 2, 3, 4]);
        assert_eq!(file.file_size(), 32);
    }
}
