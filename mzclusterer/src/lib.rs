mod args;
mod driver;
mod msp;
mod reader;

pub use args::*;
pub use driver::{MzClusterer, MzClustererError};
pub use msp::{extract_mods_from_sequence, get_mod_string, MspMod, MspWriter};
