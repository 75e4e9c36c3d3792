// topology.rs — In-memory compute hardware layout
//
// SRAM arrays are grouped into ways and ways into banks; banks form a mesh.
// Array indices run way-major inside a bank and bank-major across the mesh,
// so array `a` sits in way `a / arrays_per_way` and bank
// `way / ways_per_bank`.

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;
use crate::options::fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PumHwConfig {
    pub wordlines: u64,
    pub bitlines: u64,
    pub arrays_per_way: u64,
    pub ways_per_bank: u64,
    pub mesh_rows: u64,
    pub mesh_cols: u64,
}

impl Default for PumHwConfig {
    /// 8 x 8 mesh of banks, 16 ways of 4 arrays of 256 x 256 bits.
    fn default() -> Self {
        Self {
            wordlines: 256,
            bitlines: 256,
            arrays_per_way: 4,
            ways_per_bank: 16,
            mesh_rows: 8,
            mesh_cols: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLocation {
    pub bank: u64,
    pub way: u64,
    pub array: u64,
}

impl PumHwConfig {
    pub fn from_json(text: &str) -> Result<Self, OptionsError> {
        let hw: Self = serde_json::from_str(text)?;
        hw.validate()?;
        Ok(hw)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        let fields = [
            ("wordlines", self.wordlines),
            ("bitlines", self.bitlines),
            ("arrays_per_way", self.arrays_per_way),
            ("ways_per_bank", self.ways_per_bank),
            ("mesh_rows", self.mesh_rows),
            ("mesh_cols", self.mesh_cols),
        ];
        for (name, v) in fields {
            if v == 0 {
                return Err(OptionsError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn num_banks(&self) -> u64 {
        self.mesh_rows * self.mesh_cols
    }

    pub fn arrays_per_bank(&self) -> u64 {
        self.arrays_per_way * self.ways_per_bank
    }

    pub fn total_arrays(&self) -> u64 {
        self.arrays_per_bank() * self.num_banks()
    }

    pub fn locate_array(&self, array: u64) -> ArrayLocation {
        let way = array / self.arrays_per_way;
        ArrayLocation {
            bank: way / self.ways_per_bank,
            way,
            array,
        }
    }

    /// Mesh coordinates (row, col) of a bank.
    pub fn bank_coord(&self, bank: u64) -> (u64, u64) {
        (bank / self.mesh_cols, bank % self.mesh_cols)
    }

    /// Manhattan hops between two banks on the mesh.
    pub fn hops(&self, from: u64, to: u64) -> u64 {
        let (r0, c0) = self.bank_coord(from);
        let (r1, c1) = self.bank_coord(to);
        r0.abs_diff(r1) + c0.abs_diff(c1)
    }

    pub fn fingerprint(&self) -> Result<[u8; 32], OptionsError> {
        fingerprint(self)
    }
}
