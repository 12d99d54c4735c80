use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Score types a library spectrum can carry.
///
/// # Description
///
/// The numeric value of each variant is persisted in `RefSpectra.scoreType`
/// and as the key of the `ScoreTypes` lookup table, so the order of variants
/// must never change. New kinds are appended at the end. Tags written by
/// newer software that this list does not know are kept as `Other`.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScoreType {
    #[default]
    Unknown,
    PercolatorQValue,
    PeptideProphet,
    SpectrumMill,
    IdPickerFdr,
    MascotIonsScore,
    TandemExpectationValue,
    ProteinPilotConfidence,
    Scaffold,
    WatersMsePeptideScore,
    OmssaExpectationScore,
    ProteinProspectorExpectationScore,
    SequestXcorr,
    MaxQuantScore,
    MorpheusScore,
    MsgfScore,
    PeaksConfidenceScore,
    ByonicScore,
    PeptideShakerConfidence,
    GenericQValue,
    /// A stored tag outside the known kinds
    Other(i32),
}

impl ScoreType {
    pub const ALL: [ScoreType; 20] = [
        ScoreType::Unknown,
        ScoreType::PercolatorQValue,
        ScoreType::PeptideProphet,
        ScoreType::SpectrumMill,
        ScoreType::IdPickerFdr,
        ScoreType::MascotIonsScore,
        ScoreType::TandemExpectationValue,
        ScoreType::ProteinPilotConfidence,
        ScoreType::Scaffold,
        ScoreType::WatersMsePeptideScore,
        ScoreType::OmssaExpectationScore,
        ScoreType::ProteinProspectorExpectationScore,
        ScoreType::SequestXcorr,
        ScoreType::MaxQuantScore,
        ScoreType::MorpheusScore,
        ScoreType::MsgfScore,
        ScoreType::PeaksConfidenceScore,
        ScoreType::ByonicScore,
        ScoreType::PeptideShakerConfidence,
        ScoreType::GenericQValue,
    ];

    pub fn to_i32(&self) -> i32 {
        match self {
            ScoreType::Other(id) => *id,
            known => ScoreType::ALL
                .iter()
                .position(|score_type| score_type == known)
                .map_or(0, |index| index as i32),
        }
    }

    /// Name stored in the `ScoreTypes` table.
    pub fn to_str(&self) -> &str {
        match self {
            ScoreType::Unknown | ScoreType::Other(_) => "UNKNOWN",
            ScoreType::PercolatorQValue => "PERCOLATOR QVALUE",
            ScoreType::PeptideProphet => "PEPTIDE PROPHET SOMETHING",
            ScoreType::SpectrumMill => "SPECTRUM MILL",
            ScoreType::IdPickerFdr => "IDPICKER FDR",
            ScoreType::MascotIonsScore => "MASCOT IONS SCORE",
            ScoreType::TandemExpectationValue => "TANDEM EXPECTATION VALUE",
            ScoreType::ProteinPilotConfidence => "PROTEIN PILOT CONFIDENCE",
            ScoreType::Scaffold => "SCAFFOLD SOMETHING",
            ScoreType::WatersMsePeptideScore => "WATERS MSE PEPTIDE SCORE",
            ScoreType::OmssaExpectationScore => "OMSSA EXPECTATION SCORE",
            ScoreType::ProteinProspectorExpectationScore => "PROTEIN PROSPECTOR EXPECTATION SCORE",
            ScoreType::SequestXcorr => "SEQUEST XCORR",
            ScoreType::MaxQuantScore => "MAXQUANT SCORE",
            ScoreType::MorpheusScore => "MORPHEUS SCORE",
            ScoreType::MsgfScore => "MSGF+ SCORE",
            ScoreType::PeaksConfidenceScore => "PEAKS CONFIDENCE SCORE",
            ScoreType::ByonicScore => "BYONIC SCORE",
            ScoreType::PeptideShakerConfidence => "PEPTIDE SHAKER CONFIDENCE",
            ScoreType::GenericQValue => "GENERIC Q-VALUE",
        }
    }
}

impl Display for ScoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl From<i32> for ScoreType {
    fn from(item: i32) -> Self {
        usize::try_from(item)
            .ok()
            .and_then(|index| ScoreType::ALL.get(index).copied())
            .unwrap_or(ScoreType::Other(item))
    }
}

impl From<&str> for ScoreType {
    fn from(item: &str) -> Self {
        ScoreType::ALL
            .iter()
            .copied()
            .find(|score_type| score_type.to_str() == item)
            .unwrap_or(ScoreType::Unknown)
    }
}
