//! `signalfd`-based signal capture, grounded directly on `wormhole-attach`'s
//! `signals.rs`: a `SigSet` builder plus a level-triggered `SignalFd` read.

use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use libc::{c_int, signalfd_siginfo, sigset_t};

pub struct SigSet(sigset_t);

impl SigSet {
    pub fn empty() -> std::io::Result<Self> {
        unsafe {
            let mut set = MaybeUninit::<sigset_t>::uninit();
            if libc::sigemptyset(set.as_mut_ptr()) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(Self(set.assume_init()))
        }
    }

    pub fn add(&mut self, signal: i32) -> std::io::Result<()> {
        unsafe {
            if libc::sigaddset(&mut self.0 as *mut sigset_t, signal) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Signal set for the shadow's catch-all trap, installed after
    /// `GUEST_STARTED` (spec. §4.3.1): every signal forwarded to the peer.
    pub fn all() -> std::io::Result<Self> {
        let mut set = Self::empty()?;
        for sig in 1..=31 {
            if sig == libc::SIGKILL || sig == libc::SIGSTOP {
                continue;
            }
            set.add(sig)?;
        }
        Ok(set)
    }

    /// Signal set the guest acts on locally (spec. §4.3.2: "only
    /// SIGKILL/SIGQUIT/SIGINT are acted upon locally").
    pub fn guest_local() -> std::io::Result<Self> {
        let mut set = Self::empty()?;
        set.add(libc::SIGKILL)?;
        set.add(libc::SIGQUIT)?;
        set.add(libc::SIGINT)?;
        Ok(set)
    }
}

pub fn block(sigset: &SigSet) -> std::io::Result<()> {
    unsafe {
        if libc::sigprocmask(libc::SIG_BLOCK, &sigset.0 as *const sigset_t, std::ptr::null_mut()) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

pub struct SignalFd(OwnedFd);

impl SignalFd {
    pub fn new(sigset: &SigSet, flags: c_int) -> std::io::Result<Self> {
        unsafe {
            let fd = libc::signalfd(-1, &sigset.0 as *const sigset_t, flags);
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(Self(OwnedFd::from_raw_fd(fd)))
        }
    }

    /// Non-blocking read of one pending signal; `None` on `EAGAIN`.
    pub fn read_signal(&mut self) -> std::io::Result<Option<signalfd_siginfo>> {
        unsafe {
            let mut info = MaybeUninit::<signalfd_siginfo>::uninit();
            let n = libc::read(
                self.0.as_raw_fd(),
                info.as_mut_ptr() as *mut libc::c_void,
                std::mem::size_of::<signalfd_siginfo>(),
            );
            match n {
                x if x == std::mem::size_of::<signalfd_siginfo>() as isize => Ok(Some(info.assume_init())),
                x if x < 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EAGAIN) => Ok(None),
                x if x < 0 => Err(std::io::Error::last_os_error()),
                _ => panic!("partial read from signalfd"),
            }
        }
    }
}

impl AsFd for SignalFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}
