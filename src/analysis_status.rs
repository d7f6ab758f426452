use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Where a family stands in the analysis workflow, as stored in
/// `seqr_family.analysis_status`.
#[derive(IntoStaticStr, EnumIter, EnumString, Debug, Display, Default, PartialEq, Eq, Copy, Clone)]
pub enum AnalysisStatus {
    #[strum(serialize = "S")]
    Solved,
    #[strum(serialize = "S_kgfp")]
    SolvedKnownGeneForPhenotype,
    #[strum(serialize = "S_kgdp")]
    SolvedGeneLinkedToDifferentPhenotype,
    #[strum(serialize = "S_ng")]
    SolvedNovelGene,
    #[strum(serialize = "ES")]
    ExternalSolve,
    #[strum(serialize = "Sc_kgfp")]
    StrongCandidateKnownGeneForPhenotype,
    #[strum(serialize = "Sc_kgdp")]
    StrongCandidateGeneLinkedToDifferentPhenotype,
    #[strum(serialize = "Sc_ng")]
    StrongCandidateNovelGene,
    #[strum(serialize = "Rcpc")]
    ReviewedPursuingCandidates,
    #[strum(serialize = "Rncc")]
    ReviewedNoClearCandidate,
    #[strum(serialize = "C")]
    Closed,
    #[strum(serialize = "I")]
    AnalysisInProgress,
    #[default]
    #[strum(serialize = "Q")]
    WaitingForData,
}

impl AnalysisStatus {
    /// One-letter display category used to bucket statuses.
    pub fn category(&self) -> &'static str {
        match self {
            AnalysisStatus::Solved
            | AnalysisStatus::SolvedKnownGeneForPhenotype
            | AnalysisStatus::SolvedGeneLinkedToDifferentPhenotype
            | AnalysisStatus::SolvedNovelGene
            | AnalysisStatus::StrongCandidateKnownGeneForPhenotype
            | AnalysisStatus::StrongCandidateGeneLinkedToDifferentPhenotype
            | AnalysisStatus::StrongCandidateNovelGene => "S",
            AnalysisStatus::ExternalSolve => "E",
            AnalysisStatus::ReviewedPursuingCandidates
            | AnalysisStatus::ReviewedNoClearCandidate => "R",
            AnalysisStatus::Closed => "C",
            AnalysisStatus::AnalysisInProgress => "A",
            AnalysisStatus::WaitingForData => "W",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisStatus::Solved => "Solved",
            AnalysisStatus::SolvedKnownGeneForPhenotype => "Solved - known gene for phenotype",
            AnalysisStatus::SolvedGeneLinkedToDifferentPhenotype => {
                "Solved - gene linked to different phenotype"
            }
            AnalysisStatus::SolvedNovelGene => "Solved - novel gene",
            AnalysisStatus::ExternalSolve => "External solve",
            AnalysisStatus::StrongCandidateKnownGeneForPhenotype => {
                "Strong candidate - known gene for phenotype"
            }
            AnalysisStatus::StrongCandidateGeneLinkedToDifferentPhenotype => {
                "Strong candidate - gene linked to different phenotype"
            }
            AnalysisStatus::StrongCandidateNovelGene => "Strong candidate - novel gene",
            AnalysisStatus::ReviewedPursuingCandidates => "Reviewed, currently pursuing candidates",
            AnalysisStatus::ReviewedNoClearCandidate => "Reviewed, no clear candidate",
            AnalysisStatus::Closed => "Closed, no longer under analysis",
            AnalysisStatus::AnalysisInProgress => "Analysis in Progress",
            AnalysisStatus::WaitingForData => "Waiting for data",
        }
    }

    pub fn code(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_strum() {
        for status in AnalysisStatus::iter() {
            assert_eq!(status.code().parse::<AnalysisStatus>().unwrap(), status);
            assert_eq!(status.to_string(), status.code());
        }
    }

    #[test]
    fn test_rcpc_category() {
        let status: AnalysisStatus = "Rcpc".parse().unwrap();
        assert_eq!(status, AnalysisStatus::ReviewedPursuingCandidates);
        assert_eq!(status.category(), "R");
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert!("Solved".parse::<AnalysisStatus>().is_err());
        assert!("rcpc".parse::<AnalysisStatus>().is_err());
        assert!("".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_default_is_waiting_for_data() {
        assert_eq!(AnalysisStatus::default().code(), "Q");
        assert_eq!(AnalysisStatus::default().category(), "W");
    }

    #[test]
    fn test_thirteen_codes_within_max_length() {
        assert_eq!(AnalysisStatus::iter().count(), 13);
        assert!(AnalysisStatus::iter().all(|status| status.code().len() <= 10));
    }
}
