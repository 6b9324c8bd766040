use memmap2::MmapMut;
use nix::{libc, sys::memfd};
use std::{
    fs::File,
    io,
    os::fd::{AsFd, OwnedFd},
    ptr::{self, NonNull},
};

/// Kind of kernel object backing a [`SharedSegment`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SegmentBacking {
    /// System V segment (`shmget`), registered with `ShmAttach`
    #[default]
    SysV,

    /// Anonymous `memfd`, registered with `ShmAttachFd` (MIT-SHM 1.2)
    Memfd,
}

enum Mapping {
    SysV(NonNull<u8>),
    Memfd(MmapMut),
}

enum Handle {
    SysV(i32),
    Memfd(File),
}

/// Memory shared between this process and the display server.
///
/// Release happens in two explicit steps, [`unmap`](Self::unmap) then
/// [`remove`](Self::remove). Whatever is still held on drop is released in
/// that order.
pub struct SharedSegment {
    len: usize,
    mapping: Option<Mapping>,
    handle: Option<Handle>,
}

// SAFETY: the System V mapping is owned exclusively by this value and is only
// reachable through `&self`/`&mut self`.
unsafe impl Send for SharedSegment {}

impl SharedSegment {
    pub fn allocate(backing: SegmentBacking, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared segment size must be non-zero",
            ));
        }

        let segment = match backing {
            SegmentBacking::SysV => Self::allocate_sysv(len)?,
            SegmentBacking::Memfd => Self::allocate_memfd(len)?,
        };

        log::debug!("allocated {backing:?} shared segment of {len} bytes");
        Ok(segment)
    }

    fn allocate_sysv(len: usize) -> io::Result<Self> {
        // SAFETY: plain syscalls; every pointer passed is null or returned by shmat.
        unsafe {
            let shmid = libc::shmget(libc::IPC_PRIVATE, len, libc::IPC_CREAT | 0o600);
            if shmid < 0 {
                return Err(io::Error::last_os_error());
            }

            let addr = libc::shmat(shmid, ptr::null(), 0);
            if addr as isize == -1 {
                let err = io::Error::last_os_error();
                libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut());
                return Err(err);
            }

            let Some(addr) = NonNull::new(addr.cast::<u8>()) else {
                libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut());
                return Err(io::Error::other("shmat returned a null address"));
            };

            Ok(Self {
                len,
                mapping: Some(Mapping::SysV(addr)),
                handle: Some(Handle::SysV(shmid)),
            })
        }
    }

    fn allocate_memfd(len: usize) -> io::Result<Self> {
        let fd = memfd::memfd_create(c"screen-capture-x11-shm", memfd::MFdFlags::MFD_CLOEXEC)?;
        let file = File::from(fd);
        file.set_len(len as u64)?;

        // SAFETY: the memfd is private to this process until it is handed to the
        // display server, and it is never truncated after this point.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            len,
            mapping: Some(Mapping::Memfd(mmap)),
            handle: Some(Handle::Memfd(file)),
        })
    }

    pub fn backing(&self) -> Option<SegmentBacking> {
        match self.handle {
            Some(Handle::SysV(_)) => Some(SegmentBacking::SysV),
            Some(Handle::Memfd(_)) => Some(SegmentBacking::Memfd),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// System V id, while the kernel segment still exists.
    pub fn shmid(&self) -> Option<i32> {
        match self.handle {
            Some(Handle::SysV(shmid)) => Some(shmid),
            _ => None,
        }
    }

    /// A duplicate of the memfd, for handing to the display server.
    pub fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        match &self.handle {
            Some(Handle::Memfd(file)) => file.as_fd().try_clone_to_owned(),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "segment is not backed by a memfd",
            )),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Mapped bytes; empty once unmapped.
    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            // SAFETY: `addr` points to `len` bytes mapped by shmat until `unmap`.
            Some(Mapping::SysV(addr)) => unsafe {
                std::slice::from_raw_parts(addr.as_ptr(), self.len)
            },
            Some(Mapping::Memfd(mmap)) => &mmap[..],
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mapping {
            // SAFETY: as in `as_slice`, and `&mut self` makes the borrow unique.
            Some(Mapping::SysV(addr)) => unsafe {
                std::slice::from_raw_parts_mut(addr.as_ptr(), self.len)
            },
            Some(Mapping::Memfd(mmap)) => &mut mmap[..],
            None => &mut [],
        }
    }

    /// Detach the segment from this address space. A no-op once done.
    pub fn unmap(&mut self) -> io::Result<()> {
        match self.mapping.take() {
            Some(Mapping::SysV(addr)) => {
                // SAFETY: `addr` came from shmat and is detached exactly once.
                if unsafe { libc::shmdt(addr.as_ptr() as *const libc::c_void) } < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Some(Mapping::Memfd(mmap)) => drop(mmap),
            None => return Ok(()),
        }

        log::debug!("unmapped shared segment");
        Ok(())
    }

    /// Mark the kernel object for removal. A no-op once done.
    pub fn remove(&mut self) -> io::Result<()> {
        match self.handle.take() {
            Some(Handle::SysV(shmid)) => {
                // SAFETY: IPC_RMID ignores the buffer argument.
                if unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) } < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Some(Handle::Memfd(file)) => drop(file),
            None => return Ok(()),
        }

        log::debug!("removed shared segment");
        Ok(())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            log::warn!("unmap shared segment on drop failed: {e}");
        }

        if let Err(e) = self.remove() {
            log::warn!("remove shared segment on drop failed: {e}");
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("len", &self.len)
            .field("backing", &self.backing())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sysv_segment_exists;

    #[test]
    fn test_zero_sized_segment_is_rejected() {
        let err = SharedSegment::allocate(SegmentBacking::Memfd, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_memfd_segment_read_write() {
        let mut segment = SharedSegment::allocate(SegmentBacking::Memfd, 64).unwrap();
        assert_eq!(segment.len(), 64);
        assert_eq!(segment.backing(), Some(SegmentBacking::Memfd));
        assert!(segment.shmid().is_none());
        assert!(segment.as_slice().iter().all(|b| *b == 0));

        segment.as_mut_slice()[63] = 0xAB;
        assert_eq!(segment.as_slice()[63], 0xAB);
        assert!(segment.try_clone_fd().is_ok());
    }

    #[test]
    fn test_memfd_release_is_idempotent() {
        let mut segment = SharedSegment::allocate(SegmentBacking::Memfd, 16).unwrap();

        segment.unmap().unwrap();
        assert!(!segment.is_mapped());
        assert!(segment.as_slice().is_empty());
        segment.unmap().unwrap();

        segment.remove().unwrap();
        assert!(segment.backing().is_none());
        segment.remove().unwrap();
    }

    #[test]
    fn test_sysv_segment_lifecycle() {
        let mut segment = SharedSegment::allocate(SegmentBacking::SysV, 4096).unwrap();
        let shmid = segment.shmid().unwrap();
        assert!(sysv_segment_exists(shmid));
        assert!(segment.try_clone_fd().is_err());

        segment.as_mut_slice()[0] = 7;
        assert_eq!(segment.as_slice()[0], 7);

        segment.unmap().unwrap();
        segment.remove().unwrap();
        assert!(!sysv_segment_exists(shmid));
    }

    #[test]
    fn test_sysv_segment_released_on_drop() {
        let segment = SharedSegment::allocate(SegmentBacking::SysV, 128).unwrap();
        let shmid = segment.shmid().unwrap();

        drop(segment);
        assert!(!sysv_segment_exists(shmid));
    }
}
