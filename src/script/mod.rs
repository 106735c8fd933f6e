//! Component C2: parses raw scripts into push sequences and detects Glyph
//! envelopes in their three canonical forms.

pub mod envelope;
pub mod pushes;

pub use envelope::{detect_in_output_script, detect_in_script_sig, Envelope, EnvelopeForm, EnvelopeKind};
pub use pushes::{parse_script, Op};
