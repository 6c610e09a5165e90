//! Bridge from `Disa`'s path-oriented API to `fuser`'s inode-oriented one.
//! `DirectoryTable` and `FileTable` each have their own, possibly-colliding
//! `u32` index space, so an inode is `(kind_bit << 63) | index` rather than
//! the raw table index; a lazily-populated cache remembers which path each
//! inode we've handed out corresponds to, since `Disa` itself only resolves
//! paths, not inodes.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use libc::{EEXIST, EINVAL, EIO, EISDIR, ENOENT, ENOTDIR, ENOTEMPTY};

use crate::disa::{Disa, DisaFileHandle};
use crate::fs::{FsPath, FsResult, ROOT_DIRECTORY_INDEX};
use crate::fs_name::FsName;

const TTL: Duration = Duration::from_secs(1);
const DIR_KIND: u64 = 0;
const FILE_KIND: u64 = 1 << 63;
const KIND_MASK: u64 = 1 << 63;

fn dir_ino(index: u32) -> u64 {
    DIR_KIND | index as u64
}

fn file_ino(index: u32) -> u64 {
    FILE_KIND | index as u64
}

fn is_file_ino(ino: u64) -> bool {
    ino & KIND_MASK != 0
}

fn index_of(ino: u64) -> u32 {
    (ino & !KIND_MASK) as u32
}

fn fs_result_to_errno(result: FsResult) -> i32 {
    match result {
        FsResult::InvalidPath => EINVAL,
        FsResult::PathNotFound | FsResult::NotFound => ENOENT,
        FsResult::FileInPath => ENOTDIR,
        FsResult::FileExists | FsResult::DirExists => EEXIST,
    }
}

pub struct DisaFilesystem {
    disa: Disa,
    paths: HashMap<u64, FsPath>,
    open_files: HashMap<u64, DisaFileHandle>,
    next_fh: u64,
}

impl DisaFilesystem {
    pub fn new(disa: Disa) -> Self {
        let mut paths = HashMap::new();
        paths.insert(dir_ino(ROOT_DIRECTORY_INDEX), FsPath::from_segments(Vec::new()));
        DisaFilesystem { disa, paths, open_files: HashMap::new(), next_fh: 1 }
    }

    fn path_for(&self, ino: u64) -> Option<&FsPath> {
        self.paths.get(&ino)
    }

    fn dir_attr(&self, index: u32) -> FileAttr {
        attr(dir_ino(index), FileType::Directory, 0)
    }

    fn file_attr(&self, index: u32) -> FileAttr {
        attr(file_ino(index), FileType::RegularFile, self.disa.get_file_size(index))
    }

    fn allocate_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }
}

fn attr(ino: u64, kind: FileType, size: u64) -> FileAttr {
    let now = SystemTime::UNIX_EPOCH;
    FileAttr {
        ino,
        size,
        blocks: (size + 511) / 512,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind,
        perm: if kind == FileType::Directory { 0o755 } else { 0o644 },
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

impl Filesystem for DisaFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(base) = self.path_for(parent).cloned() else {
            reply.error(ENOENT);
            return;
        };
        let child_name = FsName::from_segment(name.as_encoded_bytes());
        let child_path = base.child(child_name);

        if let Ok(index) = self.disa.find_dir(&child_path) {
            let ino = dir_ino(index);
            self.paths.entry(ino).or_insert(child_path);
            reply.entry(&TTL, &self.dir_attr(index), 0);
        } else if let Ok(index) = self.disa.find_file(&child_path) {
            let ino = file_ino(index);
            self.paths.entry(ino).or_insert(child_path);
            reply.entry(&TTL, &self.file_attr(index), 0);
        } else {
            reply.error(ENOENT);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        if is_file_ino(ino) {
            reply.attr(&TTL, &self.file_attr(index_of(ino)));
        } else {
            reply.attr(&TTL, &self.dir_attr(index_of(ino)));
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        if is_file_ino(ino) {
            reply.error(ENOTDIR);
            return;
        }
        let Some(path) = self.path_for(ino).cloned() else {
            reply.error(ENOENT);
            return;
        };

        let mut entries = vec![(ino, FileType::Directory, ".".to_string())];
        entries.push((ino, FileType::Directory, "..".to_string()));

        match self.disa.list_sub_dir(&path) {
            Ok(names) => {
                for name in names {
                    if let Ok(index) = self.disa.find_dir(&path.child(name.clone())) {
                        entries.push((dir_ino(index), FileType::Directory, name.to_display_string()));
                    }
                }
            }
            Err(e) => {
                reply.error(fs_result_to_errno(e));
                return;
            }
        }
        match self.disa.list_sub_file(&path) {
            Ok(names) => {
                for name in names {
                    if let Ok(index) = self.disa.find_file(&path.child(name.clone())) {
                        entries.push((file_ino(index), FileType::RegularFile, name.to_display_string()));
                    }
                }
            }
            Err(e) => {
                reply.error(fs_result_to_errno(e));
                return;
            }
        }

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(base) = self.path_for(parent).cloned() else {
            reply.error(ENOENT);
            return;
        };
        let child_path = base.child(FsName::from_segment(name.as_encoded_bytes()));
        match self.disa.make_dir(&child_path) {
            Ok(index) => {
                self.paths.insert(dir_ino(index), child_path);
                reply.entry(&TTL, &self.dir_attr(index), 0);
            }
            Err(e) => reply.error(fs_result_to_errno(e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(base) = self.path_for(parent).cloned() else {
            reply.error(ENOENT);
            return;
        };
        let child_path = base.child(FsName::from_segment(name.as_encoded_bytes()));
        match self.disa.remove_dir(&child_path) {
            Ok(()) => reply.ok(),
            Err(FsResult::DirExists) => reply.error(ENOTEMPTY),
            Err(e) => reply.error(fs_result_to_errno(e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(base) = self.path_for(parent).cloned() else {
            reply.error(ENOENT);
            return;
        };
        let child_path = base.child(FsName::from_segment(name.as_encoded_bytes()));
        match self.disa.remove_file(&child_path) {
            Ok(()) => reply.ok(),
            Err(FsResult::DirExists) => reply.error(EISDIR),
            Err(e) => reply.error(fs_result_to_errno(e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(base) = self.path_for(parent).cloned() else {
            reply.error(ENOENT);
            return;
        };
        let child_path = base.child(FsName::from_segment(name.as_encoded_bytes()));
        let index = match self.disa.make_file(&child_path) {
            Ok(index) => index,
            Err(e) => {
                reply.error(fs_result_to_errno(e));
                return;
            }
        };
        self.paths.insert(file_ino(index), child_path.clone());
        let handle = match self.disa.open(&child_path) {
            Ok(handle) => handle,
            Err(e) => {
                reply.error(fs_result_to_errno(e));
                return;
            }
        };
        let fh = self.allocate_fh();
        self.open_files.insert(fh, handle);
        reply.created(&TTL, &self.file_attr(index), 0, fh, 0);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if !is_file_ino(ino) {
            reply.error(EISDIR);
            return;
        }
        let Some(path) = self.path_for(ino).cloned() else {
            reply.error(ENOENT);
            return;
        };
        match self.disa.open(&path) {
            Ok(handle) => {
                let fh = self.allocate_fh();
                self.open_files.insert(fh, handle);
                reply.opened(fh, 0);
            }
            Err(FsResult::DirExists) => reply.error(EISDIR),
            Err(e) => reply.error(fs_result_to_errno(e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.open_files.get(&fh) else {
            reply.error(EIO);
            return;
        };
        let data = handle.borrow().read(offset as u64, size as usize);
        reply.data(&data);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(handle) = self.open_files.get(&fh) else {
            reply.error(EIO);
            return;
        };
        handle.borrow_mut().write(offset as u64, data);
        reply.written(data.len() as u32);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(handle) = self.open_files.remove(&fh) {
            let action = self.disa.close(handle);
            log::debug!("closed fh {fh}: {action:?}");
        }
        reply.ok();
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if !is_file_ino(ino) {
            reply.attr(&TTL, &self.dir_attr(index_of(ino)));
            return;
        }
        // Explicit truncate/preallocate (ftruncate, O_TRUNC) is not
        // implemented in the core (see DisaFile::set_len); report ENOSYS
        // rather than calling down into a function that panics.
        if size.is_some() {
            let _ = fh;
            reply.error(libc::ENOSYS);
            return;
        }
        reply.attr(&TTL, &self.file_attr(index_of(ino)));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(src_base), Some(dst_base)) = (self.path_for(parent).cloned(), self.path_for(newparent).cloned())
        else {
            reply.error(ENOENT);
            return;
        };
        let src = src_base.child(FsName::from_segment(name.as_encoded_bytes()));
        let dst = dst_base.child(FsName::from_segment(newname.as_encoded_bytes()));
        let src_is_dir = self.disa.find_dir(&src).is_ok();

        match self.disa.rename(&src, &dst) {
            Ok(()) => reply.ok(),
            // Overwriting a non-empty destination directory.
            Err(FsResult::DirExists) if src_is_dir => reply.error(ENOTEMPTY),
            // Renaming a file onto an existing directory.
            Err(FsResult::DirExists) => reply.error(EISDIR),
            // Renaming a directory onto an existing file.
            Err(FsResult::FileExists) if src_is_dir => reply.error(ENOTDIR),
            Err(e) => reply.error(fs_result_to_errno(e)),
        }
    }
}
