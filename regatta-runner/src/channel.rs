// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The side channel a worker uses to report structured results.
//!
//! Result records are kept out of the worker's ordinary output so test
//! output cannot corrupt them. A channel is created by the controller
//! before spawn, inherited by the worker across the process boundary, and
//! closed by whichever side finishes last. Exactly one transmission mode is
//! active per channel; adding a mode is a compile-checked change because
//! every operation dispatches with an exhaustive `match`.

use crate::errors::{ChannelSetupError, UnsupportedChannelError};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{PipeReader, PipeWriter},
};
use tracing::warn;

/// A worker's binding to its result side channel.
///
/// The numeric payloads are raw OS identifiers, valid inside the worker
/// process after inheritance. The controller keeps the matching parent-side
/// endpoints in a [`ChannelPair`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ResultChannel {
    /// Records travel over the worker's own standard output, tagged with
    /// the wire envelope to keep them apart from test output.
    Stdout,

    /// A unix file descriptor kept open across exec.
    UnixFd(i32),

    /// A windows handle attached to the spawn's inheritance list.
    WindowsHandle(isize),
}

impl ResultChannel {
    /// Adjusts a subprocess launch so the channel survives into the child:
    /// clears close-on-exec for a descriptor; no action for a handle (the
    /// inheritability flag from [`scoped_inheritance`](Self::scoped_inheritance)
    /// is what carries it) or for stdout.
    pub fn prepare_for_subprocess(&self, cmd: &mut std::process::Command) {
        imp::prepare_for_subprocess(self, cmd);
    }

    /// Marks a handle channel inheritable for the duration of a spawn.
    ///
    /// The returned guard reverts the flag on every exit path, so the
    /// handle cannot leak into unrelated children spawned later. For
    /// descriptor and stdout channels both directions are no-ops.
    pub fn scoped_inheritance(&self) -> Result<InheritanceGuard<'_>, ChannelSetupError> {
        imp::set_inheritable(self, true).map_err(ChannelSetupError::SetInheritable)?;
        Ok(InheritanceGuard { channel: self })
    }

    /// Opens the channel for writing, from inside the worker process.
    ///
    /// Fails for a stdout channel: results in that mode go to the process's
    /// own standard output, there is nothing separate to open. Also fails
    /// for a mode that does not exist on this platform.
    pub fn open_for_write(&self) -> Result<File, UnsupportedChannelError> {
        imp::open_for_write(self)
    }
}

/// Scoped handle inheritability, created by
/// [`ResultChannel::scoped_inheritance`].
#[must_use = "inheritability lasts only while the guard is alive"]
#[derive(Debug)]
pub struct InheritanceGuard<'a> {
    channel: &'a ResultChannel,
}

impl Drop for InheritanceGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = imp::set_inheritable(self.channel, false) {
            warn!(?error, "failed to revert channel handle inheritability");
        }
    }
}

/// Parent-side endpoints of a freshly created channel.
///
/// The write end stays open until the spawn completes (the child inherits
/// its own copy); converting into the reader drops it, so end-of-stream on
/// the reader tracks the child's exit.
#[derive(Debug)]
pub struct ChannelPair {
    channel: ResultChannel,
    reader: PipeReader,
    writer: PipeWriter,
}

impl ChannelPair {
    /// Creates the OS pipe backing a descriptor/handle channel.
    pub fn new() -> Result<Self, ChannelSetupError> {
        imp::new_pair()
    }

    /// The child-side binding to hand to the worker.
    pub fn channel(&self) -> ResultChannel {
        self.channel
    }

    /// Releases the parent's copy of the write end and converts the read
    /// end into a [`File`] for consumption.
    pub fn into_reader(self) -> File {
        let Self {
            channel: _,
            reader,
            writer,
        } = self;
        drop(writer);
        imp::reader_into_file(reader)
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod imp {
            use super::*;
            use std::io;
            use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
            use std::os::unix::process::CommandExt;

            pub(super) fn new_pair() -> Result<ChannelPair, ChannelSetupError> {
                let (reader, writer) = io::pipe().map_err(ChannelSetupError::CreatePipe)?;
                let channel = ResultChannel::UnixFd(writer.as_raw_fd());
                Ok(ChannelPair {
                    channel,
                    reader,
                    writer,
                })
            }

            pub(super) fn reader_into_file(reader: PipeReader) -> File {
                File::from(OwnedFd::from(reader))
            }

            pub(super) fn prepare_for_subprocess(
                channel: &ResultChannel,
                cmd: &mut std::process::Command,
            ) {
                if let ResultChannel::UnixFd(fd) = *channel {
                    // Runs in the child between fork and exec: clear
                    // close-on-exec so the descriptor survives the exec.
                    unsafe {
                        cmd.pre_exec(move || {
                            let flags = libc::fcntl(fd, libc::F_GETFD);
                            if flags < 0 {
                                return Err(io::Error::last_os_error());
                            }
                            if libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                                return Err(io::Error::last_os_error());
                            }
                            Ok(())
                        });
                    }
                }
            }

            pub(super) fn set_inheritable(
                _channel: &ResultChannel,
                _inheritable: bool,
            ) -> io::Result<()> {
                // Descriptors are windowed via close-on-exec at spawn time;
                // there is no process-global flag to manage.
                Ok(())
            }

            pub(super) fn open_for_write(
                channel: &ResultChannel,
            ) -> Result<File, UnsupportedChannelError> {
                match channel {
                    ResultChannel::Stdout => Err(UnsupportedChannelError::StdoutChannel),
                    ResultChannel::UnixFd(fd) => {
                        // Duplicate so the returned file owns its own
                        // descriptor regardless of who else holds `fd`.
                        let dup = unsafe { libc::dup(*fd) };
                        if dup < 0 {
                            // An inherited descriptor that cannot be
                            // duplicated is dead; treat like a wrong-mode
                            // channel rather than panicking in the worker.
                            return Err(UnsupportedChannelError::WrongPlatform {
                                mode: "unix_fd",
                            });
                        }
                        Ok(unsafe { File::from_raw_fd(dup) })
                    }
                    ResultChannel::WindowsHandle(_) => {
                        Err(UnsupportedChannelError::WrongPlatform {
                            mode: "windows_handle",
                        })
                    }
                }
            }
        }
    } else if #[cfg(windows)] {
        mod imp {
            use super::*;
            use std::io;
            use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
            use windows_sys::Win32::Foundation::{
                HANDLE, HANDLE_FLAG_INHERIT, SetHandleInformation,
            };

            pub(super) fn new_pair() -> Result<ChannelPair, ChannelSetupError> {
                let (reader, writer) = io::pipe().map_err(ChannelSetupError::CreatePipe)?;
                let channel = ResultChannel::WindowsHandle(writer.as_raw_handle() as isize);
                Ok(ChannelPair {
                    channel,
                    reader,
                    writer,
                })
            }

            pub(super) fn reader_into_file(reader: PipeReader) -> File {
                File::from(OwnedHandle::from(reader))
            }

            pub(super) fn prepare_for_subprocess(
                _channel: &ResultChannel,
                _cmd: &mut std::process::Command,
            ) {
                // Inheritable handles are passed by the spawn machinery;
                // the inheritability window is the guard's job.
            }

            pub(super) fn set_inheritable(
                channel: &ResultChannel,
                inheritable: bool,
            ) -> io::Result<()> {
                let ResultChannel::WindowsHandle(handle) = channel else {
                    return Ok(());
                };
                let flags = if inheritable { HANDLE_FLAG_INHERIT } else { 0 };
                let res = unsafe {
                    SetHandleInformation(*handle as HANDLE, HANDLE_FLAG_INHERIT, flags)
                };
                if res == 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            }

            pub(super) fn open_for_write(
                channel: &ResultChannel,
            ) -> Result<File, UnsupportedChannelError> {
                match channel {
                    ResultChannel::Stdout => Err(UnsupportedChannelError::StdoutChannel),
                    ResultChannel::WindowsHandle(handle) => {
                        Ok(unsafe { File::from_raw_handle(*handle as RawHandle) })
                    }
                    ResultChannel::UnixFd(_) => Err(UnsupportedChannelError::WrongPlatform {
                        mode: "unix_fd",
                    }),
                }
            }
        }
    } else {
        mod imp {
            use super::*;
            use std::io;

            // Constrained targets cannot pass descriptors or handles at
            // all; runs there use the stdout mode exclusively.

            pub(super) fn new_pair() -> Result<ChannelPair, ChannelSetupError> {
                Err(ChannelSetupError::Unsupported)
            }

            pub(super) fn reader_into_file(_reader: PipeReader) -> File {
                unreachable!("channel pairs cannot be created on this platform")
            }

            pub(super) fn prepare_for_subprocess(
                _channel: &ResultChannel,
                _cmd: &mut std::process::Command,
            ) {
            }

            pub(super) fn set_inheritable(
                _channel: &ResultChannel,
                _inheritable: bool,
            ) -> io::Result<()> {
                Ok(())
            }

            pub(super) fn open_for_write(
                channel: &ResultChannel,
            ) -> Result<File, UnsupportedChannelError> {
                match channel {
                    ResultChannel::Stdout => Err(UnsupportedChannelError::StdoutChannel),
                    ResultChannel::UnixFd(_) => Err(UnsupportedChannelError::WrongPlatform {
                        mode: "unix_fd",
                    }),
                    ResultChannel::WindowsHandle(_) => {
                        Err(UnsupportedChannelError::WrongPlatform {
                            mode: "windows_handle",
                        })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn stdout_channel_cannot_be_opened() {
        let err = ResultChannel::Stdout
            .open_for_write()
            .expect_err("stdout mode has nothing to open");
        assert!(matches!(err, UnsupportedChannelError::StdoutChannel));
    }

    #[test]
    fn channel_serialization_is_tagged() {
        let value = serde_json::to_value(ResultChannel::UnixFd(7)).expect("channel serializes");
        assert_eq!(value, serde_json::json!({"mode": "unix_fd", "value": 7}));

        let value = serde_json::to_value(ResultChannel::Stdout).expect("channel serializes");
        assert_eq!(value, serde_json::json!({"mode": "stdout"}));

        let back: ResultChannel =
            serde_json::from_value(serde_json::json!({"mode": "windows_handle", "value": 1234}))
                .expect("channel deserializes");
        assert_eq!(back, ResultChannel::WindowsHandle(1234));
    }

    #[cfg(unix)]
    #[test]
    fn pair_write_end_reaches_reader() {
        use std::io::Write;

        let pair = ChannelPair::new().expect("pipe created");
        let channel = pair.channel();
        assert!(matches!(channel, ResultChannel::UnixFd(fd) if fd >= 0));

        let mut write_side = channel.open_for_write().expect("descriptor opens");
        writeln!(write_side, "hello from the worker side").expect("write succeeds");
        drop(write_side);

        let mut contents = String::new();
        pair.into_reader()
            .read_to_string(&mut contents)
            .expect("reader drains to EOF");
        assert_eq!(contents, "hello from the worker side\n");
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_survives_exec_into_a_real_child() {
        let pair = ChannelPair::new().expect("pipe created");
        let channel = pair.channel();
        let ResultChannel::UnixFd(fd) = channel else {
            panic!("unix pairs bind descriptors");
        };

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c")
            .arg(format!("echo from-the-child >&{fd}"))
            .stdin(std::process::Stdio::null());
        channel.prepare_for_subprocess(&mut cmd);

        let guard = channel.scoped_inheritance().expect("guard acquired");
        let mut child = cmd.spawn().expect("child spawns");
        drop(guard);

        let mut contents = String::new();
        pair.into_reader()
            .read_to_string(&mut contents)
            .expect("reader drains to EOF");
        let status = child.wait().expect("child reaped");

        assert!(status.success());
        assert_eq!(contents, "from-the-child\n");
    }
}
