// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signal dispatch: disposition registry, chain tables, the installed
//! handler, and the installation surface.

mod api;
mod chain;
mod registry;
mod signal_dispatcher;
mod std_fallback;

#[cfg(unix)]
pub use api::{set_sig, set_sig_action};
pub use chain::{set_chain, set_chain_pipe, ChainRule, PipeRule};
#[cfg(not(unix))]
pub use std_fallback::set_sig;
