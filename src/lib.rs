//! Ocelot teaching kernel - physical memory core
//!
//! The frame-level memory manager of a small teaching kernel: a free-list
//! allocator for 4 KiB physical frames plus a superpage engine that
//! converts 4 MiB-aligned regions between 1024 small mappings (one page
//! table) and a single large directory entry backed by a physically
//! contiguous run of frames.
//!
//! # Layering
//! - [`mm::pool`] - the frame pool (two-phase bootstrap, LIFO free list)
//! - [`mm::huge`] - contiguous-run location and 4 MiB allocation
//! - [`mm::space`] + [`mm::promote`] - per-address-space mappings and the
//!   promote/demote state machine
//! - [`mm::query`] - read-only translation and mapping queries
//!
//! All raw memory and translation-hardware access goes through the
//! [`mm::hal::Machine`] trait; [`mm::sim::SimMachine`] implements it over
//! a plain byte arena so every component is testable on the host.
//!
//! Process structures, syscall dispatch, and the file system live in the
//! surrounding kernel, not here.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod mm;
