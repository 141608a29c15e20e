// Subpage engine: nested, ordered pages of course sections.
// Section numbers for subpage sections come from a reserved band so they never
// collide with the host's own numbering. HTTP handlers only translate requests;
// all ordering rules live in `ordering` and run through `engine`.

pub mod engine;
pub mod handlers;
pub mod lifecycle;
pub mod naming;
pub mod ordering;

pub use engine::SubpageEngine;
pub use lifecycle::ModuleRegistry;
pub use naming::FormatRegistry;
