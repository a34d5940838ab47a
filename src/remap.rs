use crate::annotation::{self, TranscriptNumbering};
use crate::types::{HashMap, HashMapExt, Tid};
use anyhow::{anyhow, Result};
use std::path::PathBuf;

// A FASTA header names its transcript up to the first '.', i.e. the
// version suffix of `>ENST00000456328.2 ...` is not part of the name.
const NAME_END: u8 = b'.';

/// Build the annotation-id -> external-id translation table.
///
/// External ids follow the order transcripts appear across the FASTA
/// transcriptome files, the numbering a downstream quantifier derives from
/// the same files. Annotation ids whose names never appear in a FASTA get
/// fresh ids past the FASTA range, in increasing annotation-id order. The
/// result maps every annotation id and is injective.
pub fn build_translation(
    annotation_files: &[PathBuf],
    fasta_files: &[PathBuf],
    verbose: bool,
) -> Result<HashMap<Tid, Tid>> {
    // Re-derive the annotation numbering: same files, same order, same rule
    // as the index build, so the ids line up exactly.
    let mut numbering = TranscriptNumbering::new();
    annotation::for_each_exon_row(annotation_files, |row| {
        numbering.observe(&row.seqname, &row.transcript);
    })?;
    let id_to_name = numbering.names();

    let (name_to_external, fasta_count) = read_fasta_names(fasta_files)?;

    if verbose && id_to_name.len() != name_to_external.len() {
        if id_to_name.len() > name_to_external.len() {
            tracing::warn!(
                annotation = id_to_name.len(),
                transcriptome = name_to_external.len(),
                "annotation names more transcripts than the transcriptome file(s)"
            );
        } else {
            tracing::warn!(
                annotation = id_to_name.len(),
                transcriptome = name_to_external.len(),
                "transcriptome file(s) name more transcripts than the annotation"
            );
        }
    }

    let mut ids: Vec<Tid> = id_to_name.keys().copied().collect();
    ids.sort_unstable();

    let mut table: HashMap<Tid, Tid> = HashMap::with_capacity(ids.len());
    let mut unfound: Vec<Tid> = Vec::new();
    for id in ids {
        match id_to_name.get(&id).and_then(|name| name_to_external.get(name)) {
            Some(&external) => {
                table.insert(id, external);
            }
            None => unfound.push(id),
        }
    }

    let mut next = fasta_count;
    for id in unfound {
        table.insert(id, next);
        next += 1;
    }

    Ok(table)
}

/// Walk the FASTA files in order, mapping each new transcript name to the
/// position of its header. Returns the map and the number of headers seen.
fn read_fasta_names(files: &[PathBuf]) -> Result<(HashMap<String, Tid>, Tid)> {
    let mut names: HashMap<String, Tid> = HashMap::new();
    let mut count: Tid = 0;

    for path in files {
        let mut reader = needletail::parse_fastx_file(path)
            .map_err(|e| anyhow!("failed to open transcriptome {}: {}", path.display(), e))?;
        while let Some(result) = reader.next() {
            let record = result
                .map_err(|e| anyhow!("failed to parse transcriptome {}: {}", path.display(), e))?;
            let id = record.id();
            let end = id.iter().position(|&b| b == NAME_END).unwrap_or(id.len());
            let name = String::from_utf8_lossy(&id[..end]).to_ascii_lowercase();
            let external = count;
            count += 1;
            names.entry(name).or_insert(external);
        }
    }

    Ok((names, count))
}
