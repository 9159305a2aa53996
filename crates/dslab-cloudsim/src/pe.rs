//! Processing element (CPU core).

use serde::Serialize;

use crate::error::{ensure_positive, Result};

/// A single core with a fixed MIPS rating, the unit of raw host capacity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessingElement {
    id: u32,
    mips: f64,
}

impl ProcessingElement {
    pub fn new(id: u32, mips: f64) -> Result<Self> {
        let mips = ensure_positive("pe mips", mips)?;
        Ok(Self { id, mips })
    }

    /// Creates `count` identical PEs with IDs starting from zero.
    pub fn uniform(count: u32, mips: f64) -> Result<Vec<Self>> {
        (0..count).map(|id| Self::new(id, mips)).collect()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mips(&self) -> f64 {
        self.mips
    }
}
