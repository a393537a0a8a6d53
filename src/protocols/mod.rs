//! Protocol implementations for the EasyLase DAC.
//!
//! This module contains the low-level wire protocol and the device link that
//! speaks it over a [`Transport`](crate::transport::Transport).

pub mod easylase;
