//! Pipeline stages for image/HTML-to-PDF conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the HTML backend can be swapped without touching
//! the rest.
//!
//! ## Data Flow
//!
//! ```text
//!  html item ──▶ html ──────────────────────────────┐
//!                (browser, calling context)         │ artifact
//!                                                   ▼
//! image item ──▶ normalize ──▶ encode ──▶ plan ──▶ assemble ──▶ PDF(s)
//!                (decode,      (lopdf      (order)   (merge /
//!                 flatten,      page)                 write one)
//!                 resize)
//! ```
//!
//! 1. [`html`]      — render one HTML document to a single-page PDF; strictly
//!    sequential, on the context that owns the browser
//! 2. [`normalize`] — decode an image, flatten alpha on white, optionally
//!    resize so one edge equals the reference length
//! 3. [`encode`]    — wrap a bitmap into a single-page PDF at a quality level
//! 4. [`plan`]      — freeze the per-item actions in run order
//! 5. [`assemble`]  — merge artifacts page by page, or write one file per item

pub mod assemble;
pub mod encode;
pub mod html;
pub mod normalize;
pub mod plan;
