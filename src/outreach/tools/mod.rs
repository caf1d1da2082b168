// SPDX-License-Identifier: MIT

pub mod webhook;

pub use webhook::WebhookTool;
