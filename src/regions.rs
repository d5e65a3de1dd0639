//! Code/data/unknown region classification.
//!
//! Partitions the code extent into candidate sections at the unknown-region
//! boundaries (each unknown run is its own candidate, and the decoded runs
//! between them are candidates too), scores each by decode density, and
//! applies a constant-pool reclassification pass to small UNKNOWN regions
//! flanked by CODE on both sides.

use crate::types::{Confidence, EngineOptions, Instruction, Region, RegionType};

/// Classify the code extent `[code_start, code_end)` into regions.
pub fn classify_regions(
    code_start: u32,
    code_end: u32,
    instructions: &[Instruction],
    unknown_regions: &[(u32, u32, Vec<u8>)],
    options: &EngineOptions,
) -> Vec<Region> {
    if code_start >= code_end {
        return Vec::new();
    }

    let sections = candidate_sections(code_start, code_end, unknown_regions);
    let mut regions: Vec<Region> = sections
        .into_iter()
        .map(|(start, end)| classify_section(start, end, instructions, options))
        .collect();

    detect_constant_pools(&mut regions, options.constant_pool_max_size);
    regions
}

fn candidate_sections(
    code_start: u32,
    code_end: u32,
    unknown_regions: &[(u32, u32, Vec<u8>)],
) -> Vec<(u32, u32)> {
    let mut boundaries: Vec<u32> = vec![code_start, code_end];
    for (start, end, _) in unknown_regions {
        boundaries.push(*start);
        boundaries.push(*end + 1);
    }
    boundaries.retain(|b| *b >= code_start && *b <= code_end);
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut sections = Vec::new();
    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0], pair[1] - 1);
        if start <= end {
            sections.push((start, end));
        }
    }
    sections
}

fn classify_section(
    start: u32,
    end: u32,
    instructions: &[Instruction],
    options: &EngineOptions,
) -> Region {
    let section_size = (end - start + 1) as f64;
    let decoded_bytes: u64 = instructions
        .iter()
        .filter(|i| i.address >= start && i.address <= end && i.mnemonic != "UNKNOWN")
        .map(|i| i.bytes.len() as u64)
        .sum();
    let decode_rate = if section_size > 0.0 {
        decoded_bytes as f64 / section_size
    } else {
        0.0
    };

    let (region_type, confidence, evidence) = if decode_rate > options.code_density_threshold {
        (
            RegionType::Code,
            Confidence::High,
            format!("decode_rate={:.2} > {:.2}", decode_rate, options.code_density_threshold),
        )
    } else if decode_rate < options.data_density_threshold {
        (
            RegionType::Data,
            Confidence::Medium,
            format!("decode_rate={:.2} < {:.2}", decode_rate, options.data_density_threshold),
        )
    } else {
        (
            RegionType::Unknown,
            Confidence::Low,
            format!("decode_rate={:.2} in uncertain range", decode_rate),
        )
    };

    Region {
        start,
        end,
        region_type,
        confidence,
        evidence,
        decode_rate,
    }
}

fn detect_constant_pools(regions: &mut [Region], max_size: u32) {
    let snapshot: Vec<(u32, u32, RegionType)> = regions
        .iter()
        .map(|r| (r.start, r.end, r.region_type))
        .collect();

    for region in regions.iter_mut() {
        if region.region_type != RegionType::Unknown {
            continue;
        }
        let size = region.end - region.start + 1;
        if size >= max_size {
            continue;
        }
        let has_code_before = snapshot
            .iter()
            .any(|(_, end, t)| *t == RegionType::Code && *end < region.start);
        let has_code_after = snapshot
            .iter()
            .any(|(start, _, t)| *t == RegionType::Code && *start > region.end);
        if has_code_before && has_code_after {
            region.region_type = RegionType::Data;
            region.confidence = Confidence::Medium;
            region.evidence = "constant_pool_pattern".to_string();
        }
    }
}
