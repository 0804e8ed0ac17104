//! `stdmock` declares the interfaces of the standard library as traits and makes all of them mockable with [unimock].
//!
//! Production code is written against the traits (`dyn Reader`, `impl Os`, `&dyn Net` and so on)
//! and receives a real implementation, such as [os::SystemOs] or [net::SystemNet], at runtime.
//! In tests, a single [unimock::Unimock] instance stands in for any number of these traits at the same time:
//!
//! ```rust
//! use stdmock::io::{Reader, ReaderMock, Closer, CloserMock};
//! use unimock::*;
//!
//! fn drain(stream: &mut (impl Reader + Closer)) -> std::io::Result<usize> {
//!     let mut buf = [0; 16];
//!     let mut total = 0;
//!     loop {
//!         match stream.read(&mut buf)? {
//!             0 => break,
//!             n => total += n,
//!         }
//!     }
//!     stream.close()?;
//!     Ok(total)
//! }
//!
//! let mut u = Unimock::new((
//!     ReaderMock::read
//!         .next_call(matching!(_))
//!         .answers(&|_, _| Ok(10)),
//!     ReaderMock::read
//!         .next_call(matching!(_))
//!         .answers(&|_, _| Ok(0)),
//!     CloserMock::close
//!         .next_call(matching!())
//!         .answers(&|_| Ok(())),
//! ));
//!
//! assert_eq!(10, drain(&mut u).unwrap());
//! ```
//!
//! `next_call` clauses form one ordered sequence across all the traits implemented by the same `Unimock`,
//! and every expectation is verified when the instance is dropped.
//!
//! # Modules
//! | module               | mirrors                          |
//! |----------------------|----------------------------------|
//! | [io], [io::fs]       | readers, writers, file systems   |
//! | [os], [os::exec], [os::signal] | files, environment, processes, signals |
//! | [net], [net::http]   | connections, listeners, HTTP     |
//! | [path], [path::filepath] | slash and OS path manipulation |
//! | [sync]               | lockers, wait groups, pools, maps |
//! | `encoding::json`     | JSON values, streams             |
//! | `testutil`           | assertion helpers                |

#![forbid(unsafe_code)]
#![cfg_attr(feature = "unstable-doc-cfg", feature(doc_cfg))]

/// Re-export of the mocking engine, for use in downstream test code.
pub use unimock;

/// JSON and other data encodings.
#[cfg_attr(feature = "unstable-doc-cfg", doc(cfg(feature = "json")))]
#[cfg(feature = "json")]
pub mod encoding;

pub mod io;
pub mod net;
pub mod os;
pub mod path;
pub mod sync;

#[cfg_attr(feature = "unstable-doc-cfg", doc(cfg(feature = "testutil")))]
#[cfg(feature = "testutil")]
pub mod testutil;
