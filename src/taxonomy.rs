//! Rank-aware lineages and clade membership.
//!
//! Virus-Host DB lineages are plain `;`-separated name lists. They are parsed once into
//! `(rank, name)` nodes so that membership is decided by exact rank-qualified names rather
//! than substring scans (a lineage mentioning "Primatesvirus" is not a primate).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::TaxId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Superkingdom,
    Realm,
    Kingdom,
    Phylum,
    Subphylum,
    Class,
    Order,
    Suborder,
    Family,
    Subfamily,
    Genus,
    Unranked,
}

/// ICTV rank suffixes, longest first so `-viricotina` wins over `-viricota`.
const VIRAL_RANK_SUFFIXES: &[(&str, Rank)] = &[
    ("viricotina", Rank::Subphylum),
    ("viricetes", Rank::Class),
    ("viricota", Rank::Phylum),
    ("virineae", Rank::Suborder),
    ("viridae", Rank::Family),
    ("virinae", Rank::Subfamily),
    ("virales", Rank::Order),
    ("viria", Rank::Realm),
    ("virae", Rank::Kingdom),
];

/// Host clade names that carry a rank in VHDB host lineages.
const HOST_RANKS: &[(&str, Rank)] = &[
    ("Eukaryota", Rank::Superkingdom),
    ("Bacteria", Rank::Superkingdom),
    ("Archaea", Rank::Superkingdom),
    ("Metazoa", Rank::Kingdom),
    ("Viridiplantae", Rank::Kingdom),
    ("Fungi", Rank::Kingdom),
    ("Chordata", Rank::Phylum),
    ("Arthropoda", Rank::Phylum),
    ("Vertebrata", Rank::Subphylum),
    ("Mammalia", Rank::Class),
    ("Aves", Rank::Class),
    ("Actinopteri", Rank::Class),
    ("Insecta", Rank::Class),
    ("Primates", Rank::Order),
    ("Chiroptera", Rank::Order),
    ("Rodentia", Rank::Order),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageNode {
    pub rank: Rank,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    nodes: Vec<LineageNode>,
}

impl Lineage {
    /// Parses a viral lineage, classifying nodes by ICTV suffix.
    pub fn parse_viral(text: &str) -> Self {
        Self::parse_with(text, viral_rank)
    }

    /// Parses a host lineage, classifying nodes by the fixed host clade table.
    pub fn parse_host(text: &str) -> Self {
        Self::parse_with(text, host_rank)
    }

    fn parse_with(text: &str, classify: fn(&str) -> Rank) -> Self {
        let nodes = text
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|name| LineageNode {
                rank: classify(name),
                name: name.to_string(),
            })
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[LineageNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when a node of exactly this rank and name (ASCII case-insensitive) is present.
    pub fn contains(&self, rank: Rank, name: &str) -> bool {
        self.nodes
            .iter()
            .any(|node| node.rank == rank && node.name.eq_ignore_ascii_case(name))
    }

    /// The most specific node of a rank.
    pub fn last_of(&self, rank: Rank) -> Option<&str> {
        self.nodes
            .iter()
            .rev()
            .find(|node| node.rank == rank)
            .map(|node| node.name.as_str())
    }

    pub fn names_of(&self, rank: Rank) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(move |node| node.rank == rank)
            .map(|node| node.name.as_str())
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, node) in self.nodes.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&node.name)?;
        }
        Ok(())
    }
}

fn viral_rank(name: &str) -> Rank {
    let lower = name.to_ascii_lowercase();
    // "unclassified Caudoviricetes" and friends are placeholders, not ranks
    if lower.contains(' ') {
        return Rank::Unranked;
    }
    VIRAL_RANK_SUFFIXES
        .iter()
        .find(|(suffix, _)| lower.ends_with(suffix))
        .map(|(_, rank)| *rank)
        .unwrap_or(Rank::Unranked)
}

fn host_rank(name: &str) -> Rank {
    HOST_RANKS
        .iter()
        .find(|(clade, _)| clade.eq_ignore_ascii_case(name))
        .map(|(_, rank)| *rank)
        .unwrap_or(Rank::Unranked)
}

/// Family/order/class/phylum summary of a viral lineage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViralTaxonomy {
    pub family: Option<String>,
    pub order: Option<String>,
    pub class: Option<String>,
    pub phylum: Option<String>,
}

impl ViralTaxonomy {
    pub fn from_lineage(lineage: &Lineage) -> Self {
        Self {
            family: lineage.last_of(Rank::Family).map(str::to_string),
            order: lineage.last_of(Rank::Order).map(str::to_string),
            class: lineage.last_of(Rank::Class).map(str::to_string),
            phylum: lineage.last_of(Rank::Phylum).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clade {
    Human,
    /// Chimpanzee or bonobo.
    GreatApe,
    Vertebrata,
    Mammalia,
    NonHumanPrimate,
}

/// Fixed identifiers and rank-qualified names that define each clade.
#[derive(Debug, Clone)]
pub struct CladeTable {
    pub human_taxid: TaxId,
    pub great_ape_taxids: BTreeSet<TaxId>,
    pub vertebrata: (Rank, &'static str),
    pub mammalia: (Rank, &'static str),
    pub primates: (Rank, &'static str),
}

pub const HUMAN_TAXID: TaxId = 9606;
pub const CHIMPANZEE_TAXID: TaxId = 9598;
pub const BONOBO_TAXID: TaxId = 9597;

impl Default for CladeTable {
    fn default() -> Self {
        Self {
            human_taxid: HUMAN_TAXID,
            great_ape_taxids: BTreeSet::from([CHIMPANZEE_TAXID, BONOBO_TAXID]),
            vertebrata: (Rank::Subphylum, "Vertebrata"),
            mammalia: (Rank::Class, "Mammalia"),
            primates: (Rank::Order, "Primates"),
        }
    }
}

/// Borrowed view of the host side of a record.
#[derive(Debug, Clone, Copy)]
pub struct HostRef<'a> {
    pub taxid: Option<TaxId>,
    pub lineage: &'a Lineage,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyResolver {
    table: CladeTable,
}

impl TaxonomyResolver {
    pub fn new(table: CladeTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &CladeTable {
        &self.table
    }

    /// Absent or unrecognized taxonomy is never a member.
    pub fn is_member(&self, host: HostRef<'_>, clade: Clade) -> bool {
        match clade {
            Clade::Human => host.taxid == Some(self.table.human_taxid),
            Clade::GreatApe => host
                .taxid
                .is_some_and(|id| self.table.great_ape_taxids.contains(&id)),
            Clade::Vertebrata => {
                let (rank, name) = self.table.vertebrata;
                host.lineage.contains(rank, name)
            }
            Clade::Mammalia => {
                let (rank, name) = self.table.mammalia;
                host.lineage.contains(rank, name)
            }
            Clade::NonHumanPrimate => {
                let (rank, name) = self.table.primates;
                host.lineage.contains(rank, name) && !self.is_member(host, Clade::Human)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUMAN_LINEAGE: &str =
        "Eukaryota; Metazoa; Chordata; Vertebrata; Mammalia; Primates; Hominidae; Homo";

    #[test]
    fn viral_ranks_by_suffix() {
        let lineage = Lineage::parse_viral(
            "Viruses; Riboviria; Orthornavirae; Kitrinoviricota; Flasuviricetes; Amarillovirales; Flaviviridae; Orthoflavivirus",
        );
        let taxonomy = ViralTaxonomy::from_lineage(&lineage);
        assert_eq!(taxonomy.family.as_deref(), Some("Flaviviridae"));
        assert_eq!(taxonomy.order.as_deref(), Some("Amarillovirales"));
        assert_eq!(taxonomy.class.as_deref(), Some("Flasuviricetes"));
        assert_eq!(taxonomy.phylum.as_deref(), Some("Kitrinoviricota"));
        assert!(lineage.contains(Rank::Realm, "riboviria"));
    }

    #[test]
    fn subphylum_is_not_phylum() {
        let lineage = Lineage::parse_viral("Viruses; Negarnaviricota; Polyploviricotina");
        assert_eq!(lineage.last_of(Rank::Phylum), Some("Negarnaviricota"));
        assert_eq!(lineage.last_of(Rank::Subphylum), Some("Polyploviricotina"));
    }

    #[test]
    fn unclassified_placeholder_is_unranked() {
        let lineage = Lineage::parse_viral("Viruses; Duplodnaviria; unclassified Caudoviricetes");
        assert_eq!(lineage.last_of(Rank::Class), None);
    }

    #[test]
    fn empty_lineage_is_never_a_member() {
        let resolver = TaxonomyResolver::default();
        let lineage = Lineage::parse_host("");
        let host = HostRef {
            taxid: None,
            lineage: &lineage,
        };
        for clade in [
            Clade::Human,
            Clade::GreatApe,
            Clade::Vertebrata,
            Clade::Mammalia,
            Clade::NonHumanPrimate,
        ] {
            assert!(!resolver.is_member(host, clade));
        }
    }

    #[test]
    fn human_is_not_a_non_human_primate() {
        let resolver = TaxonomyResolver::default();
        let lineage = Lineage::parse_host(HUMAN_LINEAGE);
        let human = HostRef {
            taxid: Some(HUMAN_TAXID),
            lineage: &lineage,
        };
        assert!(resolver.is_member(human, Clade::Human));
        assert!(resolver.is_member(human, Clade::Mammalia));
        assert!(resolver.is_member(human, Clade::Vertebrata));
        assert!(!resolver.is_member(human, Clade::NonHumanPrimate));

        let macaque = HostRef {
            taxid: Some(9544),
            lineage: &lineage,
        };
        assert!(resolver.is_member(macaque, Clade::NonHumanPrimate));
        assert!(!resolver.is_member(macaque, Clade::GreatApe));
    }

    #[test]
    fn substring_does_not_match_clade() {
        let resolver = TaxonomyResolver::default();
        let lineage = Lineage::parse_host("Eukaryota; Metazoa; Invertebrata-like group");
        let host = HostRef {
            taxid: Some(1),
            lineage: &lineage,
        };
        assert!(!resolver.is_member(host, Clade::Vertebrata));
    }
}
