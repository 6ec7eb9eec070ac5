//! # Target descriptors
//!
//! The closed set of output architectures and the immutable capability
//! record of each. The dispatcher checks every function's requirements
//! against the selected descriptor before any emitter runs.

use crate::compiler::ir::IrFunction;
use crate::compiler::types::Type;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Output architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    /// Z80 assembly with the self-modifying calling convention available
    #[serde(alias = "z80")]
    Z80Smc,
    /// MOS 6502 assembly (ca65 syntax)
    #[serde(alias = "6502")]
    Mos6502,
    /// Motorola 68000 assembly (GNU as syntax)
    #[serde(alias = "68000")]
    M68k,
    /// LLVM-style SSA text
    #[serde(rename = "ssa", alias = "llvm")]
    PortableSsa,
    /// Portable C99, the reference emitter
    #[default]
    #[serde(alias = "c")]
    C99,
}

impl Target {
    pub const ALL: [Target; 5] = [
        Target::Z80Smc,
        Target::Mos6502,
        Target::M68k,
        Target::PortableSsa,
        Target::C99,
    ];

    /// Canonical identifier
    pub fn id(self) -> &'static str {
        self.descriptor().name
    }

    pub fn descriptor(self) -> &'static TargetDescriptor {
        match self {
            Target::Z80Smc => &Z80,
            Target::Mos6502 => &MOS6502,
            Target::M68k => &M68K,
            Target::PortableSsa => &SSA,
            Target::C99 => &C99,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "z80-smc" | "z80" => Ok(Target::Z80Smc),
            "mos6502" | "6502" => Ok(Target::Mos6502),
            "m68k" | "68000" => Ok(Target::M68k),
            "ssa" | "llvm" => Ok(Target::PortableSsa),
            "c99" | "c" => Ok(Target::C99),
            _ => Err(Error::UnknownTarget(s.to_string())),
        }
    }
}

/// Optional IR features a target may or may not implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Feature {
    SelfModifyingCode,
    FixedPoint,
    Wide24,
    Wide32,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Feature::SelfModifyingCode => "self-modifying calling convention",
            Feature::FixedPoint => "fixed-point arithmetic",
            Feature::Wide24 => "24-bit values",
            Feature::Wide32 => "32-bit values",
        };
        f.write_str(s)
    }
}

/// How the hardware compares integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonModel {
    /// Only carry/zero flags; signed order is emulated by flipping sign bits
    UnsignedFlags,
    /// Signed and unsigned condition codes
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressingMode {
    Immediate,
    Absolute,
    ZeroPage,
    Indexed,
    IndirectIndexed,
    RegisterIndirect,
    Displacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    Assembly,
    SsaText,
    CSource,
}

/// Capability record of one architecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDescriptor {
    pub target: Target,
    pub name: &'static str,
    /// Native word size in bits
    pub word_bits: u32,
    pub pointer_bytes: u32,
    pub comparisons: ComparisonModel,
    pub addressing: &'static [AddressingMode],
    pub supports_smc: bool,
    pub features: &'static [Feature],
    pub output: OutputFormat,
    /// Line comment leader of the output format
    pub comment: &'static str,
}

static Z80: TargetDescriptor = TargetDescriptor {
    target: Target::Z80Smc,
    name: "z80-smc",
    word_bits: 8,
    pointer_bytes: 2,
    comparisons: ComparisonModel::UnsignedFlags,
    addressing: &[
        AddressingMode::Immediate,
        AddressingMode::Absolute,
        AddressingMode::Indexed,
        AddressingMode::RegisterIndirect,
    ],
    supports_smc: true,
    features: &[Feature::SelfModifyingCode],
    output: OutputFormat::Assembly,
    comment: ";",
};

static MOS6502: TargetDescriptor = TargetDescriptor {
    target: Target::Mos6502,
    name: "mos6502",
    word_bits: 8,
    pointer_bytes: 2,
    comparisons: ComparisonModel::UnsignedFlags,
    addressing: &[
        AddressingMode::Immediate,
        AddressingMode::Absolute,
        AddressingMode::ZeroPage,
        AddressingMode::Indexed,
        AddressingMode::IndirectIndexed,
    ],
    supports_smc: false,
    features: &[Feature::Wide24, Feature::Wide32],
    output: OutputFormat::Assembly,
    comment: ";",
};

static M68K: TargetDescriptor = TargetDescriptor {
    target: Target::M68k,
    name: "m68k",
    word_bits: 32,
    pointer_bytes: 4,
    comparisons: ComparisonModel::Native,
    addressing: &[
        AddressingMode::Immediate,
        AddressingMode::Absolute,
        AddressingMode::RegisterIndirect,
        AddressingMode::Displacement,
        AddressingMode::Indexed,
    ],
    supports_smc: false,
    features: &[Feature::FixedPoint, Feature::Wide24, Feature::Wide32],
    output: OutputFormat::Assembly,
    comment: "|",
};

static SSA: TargetDescriptor = TargetDescriptor {
    target: Target::PortableSsa,
    name: "ssa",
    word_bits: 32,
    pointer_bytes: 8,
    comparisons: ComparisonModel::Native,
    addressing: &[AddressingMode::RegisterIndirect],
    supports_smc: false,
    features: &[Feature::FixedPoint, Feature::Wide24, Feature::Wide32],
    output: OutputFormat::SsaText,
    comment: ";",
};

static C99: TargetDescriptor = TargetDescriptor {
    target: Target::C99,
    name: "c99",
    word_bits: 32,
    pointer_bytes: 8,
    comparisons: ComparisonModel::Native,
    addressing: &[AddressingMode::RegisterIndirect],
    supports_smc: false,
    features: &[Feature::FixedPoint, Feature::Wide24, Feature::Wide32],
    output: OutputFormat::CSource,
    comment: "//",
};

impl TargetDescriptor {
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Features `func` needs that this target lacks
    pub fn missing_features(&self, func: &IrFunction) -> Vec<Feature> {
        required_features(func)
            .into_iter()
            .filter(|f| !self.has(*f))
            .collect()
    }

    /// Features storing a value of `ty` needs that this target lacks
    pub fn missing_type_features(&self, ty: &Type) -> Vec<Feature> {
        let mut needed = BTreeSet::new();
        type_features(ty, &mut needed);
        needed.into_iter().filter(|f| !self.has(*f)).collect()
    }
}

/// Optional features the IR of `func` relies on
pub fn required_features(func: &IrFunction) -> BTreeSet<Feature> {
    let mut out = BTreeSet::new();
    if func.uses_smc_convention() {
        out.insert(Feature::SelfModifyingCode);
    }
    type_features(&func.return_type, &mut out);
    for r in func.live_registers() {
        type_features(func.reg_type(r), &mut out);
    }
    out
}

fn type_features(ty: &Type, out: &mut BTreeSet<Feature>) {
    match ty {
        Type::Fixed(kind) => {
            out.insert(Feature::FixedPoint);
            if kind.bits() == 24 {
                out.insert(Feature::Wide24);
            }
        }
        Type::U24 | Type::I24 => {
            out.insert(Feature::Wide24);
        }
        Type::U32 | Type::I32 => {
            out.insert(Feature::Wide32);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{CallingConvention, IrInstruction, Symbol};

    #[test]
    fn test_parse_identifiers() {
        assert_eq!("z80-smc".parse::<Target>().unwrap(), Target::Z80Smc);
        assert_eq!("6502".parse::<Target>().unwrap(), Target::Mos6502);
        assert_eq!("llvm".parse::<Target>().unwrap(), Target::PortableSsa);
        assert_eq!("C".parse::<Target>().unwrap(), Target::C99);
        assert!(matches!(
            "pdp11".parse::<Target>(),
            Err(Error::UnknownTarget(_))
        ));
        for t in Target::ALL {
            assert_eq!(t.id().parse::<Target>().unwrap(), t);
        }
    }

    #[test]
    fn test_serde_ids() {
        assert_eq!(serde_json::to_string(&Target::Z80Smc).unwrap(), "\"z80-smc\"");
        assert_eq!(serde_json::to_string(&Target::PortableSsa).unwrap(), "\"ssa\"");
        let t: Target = serde_json::from_str("\"68000\"").unwrap();
        assert_eq!(t, Target::M68k);
    }

    #[test]
    fn test_only_z80_supports_smc() {
        for t in Target::ALL {
            assert_eq!(t.descriptor().supports_smc, t == Target::Z80Smc);
            assert_eq!(
                t.descriptor().supports_smc,
                t.descriptor().has(Feature::SelfModifyingCode)
            );
        }
    }

    #[test]
    fn test_required_features() {
        let mut f = IrFunction::new(Symbol::new("m", "f", vec![]), Type::U8);
        let x = f.registers.alloc(Type::U24);
        f.instructions = vec![IrInstruction::Const(x, 1), IrInstruction::Return(None)];
        f.convention = CallingConvention::Smc;
        let req = required_features(&f);
        assert!(req.contains(&Feature::Wide24));
        assert!(req.contains(&Feature::SelfModifyingCode));
        assert_eq!(Target::Z80Smc.descriptor().missing_features(&f), vec![Feature::Wide24]);
        assert_eq!(
            Target::C99.descriptor().missing_features(&f),
            vec![Feature::SelfModifyingCode]
        );
    }

    #[test]
    fn test_dead_registers_need_no_features() {
        let mut f = IrFunction::new(Symbol::new("m", "f", vec![]), Type::U8);
        f.registers.alloc(Type::U32);
        let x = f.registers.alloc(Type::U8);
        f.instructions = vec![IrInstruction::Const(x, 1), IrInstruction::Return(Some(x))];
        assert!(required_features(&f).is_empty());
        assert!(Target::Z80Smc.descriptor().missing_features(&f).is_empty());
    }

    #[test]
    fn test_missing_type_features() {
        let z80 = Target::Z80Smc.descriptor();
        assert_eq!(z80.missing_type_features(&Type::U32), vec![Feature::Wide32]);
        assert!(z80.missing_type_features(&Type::U16).is_empty());
        assert!(Target::C99.descriptor().missing_type_features(&Type::U32).is_empty());
    }
}
