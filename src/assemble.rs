//! Record assembly: content, entities, embedding and provenance combined
//! into the canonical [`IngestRecord`]. Pure; no I/O.

use crate::error::AssemblyError;
use crate::models::{
    Artifact, ArtifactKind, ContentHandle, EmbeddingVector, EntitySet, IngestRecord,
    RecordMetadata,
};

/// Find the digit group of the first `<kind>_<digits>` occurrence in `file_name`.
pub fn parse_page_number(file_name: &str, kind: ArtifactKind) -> Option<&str> {
    let marker = format!("{}_", kind.as_str());
    file_name.match_indices(&marker).find_map(|(at, m)| {
        let rest = &file_name[at + m.len()..];
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        (len > 0).then(|| &rest[..len])
    })
}

/// External locator: `<prefix>/<stem>.<ext>`.
pub fn locator(prefix: &str, artifact: &Artifact) -> String {
    let prefix = prefix.trim_end_matches('/');
    if artifact.extension.is_empty() {
        format!("{}/{}", prefix, artifact.stem)
    } else {
        format!("{}/{}.{}", prefix, artifact.stem, artifact.extension)
    }
}

/// Text that is embedded and stored as `file_text`.
///
/// Images: entity answer followed by the description, so entities act as a
/// prefilter signal in the embedded text. Text pages: the raw page text.
pub fn content_text(artifact: &Artifact, entities: &EntitySet) -> String {
    match &artifact.content {
        ContentHandle::Text(text) => text.clone(),
        ContentHandle::ImagePath(_) => {
            let raw = entities.raw.as_deref().unwrap_or_default();
            let description = entities.description.as_deref().unwrap_or_default();
            match (raw.is_empty(), description.is_empty()) {
                (false, false) => format!("{}\n\n{}", raw, description),
                (false, true) => raw.to_string(),
                _ => description.to_string(),
            }
        }
    }
}

/// `metadata.entities`: comma-joined for text, raw extractor output for images.
pub fn entities_field(kind: ArtifactKind, entities: &EntitySet) -> String {
    match kind {
        ArtifactKind::Text => entities.entities.join(", "),
        ArtifactKind::Image => entities
            .raw
            .clone()
            .unwrap_or_else(|| entities.entities.join(", ")),
    }
}

/// Build the ingest record for one artifact.
///
/// Fails only when the filename has no `<kind>_<digits>` page marker.
pub fn assemble(
    artifact: &Artifact,
    entities: &EntitySet,
    embedding: EmbeddingVector,
    locator_prefix: &str,
) -> Result<IngestRecord, AssemblyError> {
    let page_number = parse_page_number(&artifact.file_name, artifact.kind).ok_or_else(|| {
        AssemblyError {
            file_name: artifact.file_name.clone(),
            kind: artifact.kind.as_str(),
        }
    })?;

    Ok(IngestRecord {
        file_path: locator(locator_prefix, artifact),
        file_text: content_text(artifact, entities),
        page_number: page_number.to_string(),
        metadata: RecordMetadata {
            filename: artifact.file_name.clone(),
            entities: entities_field(artifact.kind, entities),
        },
        vector_embedding: embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn text_artifact(name: &str, body: &str) -> Artifact {
        Artifact::text(Path::new(name), body.to_string())
    }

    #[test]
    fn page_number_is_the_digit_group() {
        assert_eq!(parse_page_number("text_1.txt", ArtifactKind::Text), Some("1"));
        assert_eq!(parse_page_number("image_042.png", ArtifactKind::Image), Some("042"));
        assert_eq!(
            parse_page_number("report_image_17_hires.jpg", ArtifactKind::Image),
            Some("17")
        );
        assert_eq!(
            parse_page_number("text_x_text_9.txt", ArtifactKind::Text),
            Some("9")
        );
    }

    #[test]
    fn page_number_missing() {
        assert_eq!(parse_page_number("cover.png", ArtifactKind::Image), None);
        assert_eq!(parse_page_number("text_.txt", ArtifactKind::Text), None);
        // Marker must match the artifact's own kind.
        assert_eq!(parse_page_number("image_3.txt", ArtifactKind::Text), None);
    }

    #[test]
    fn text_record() {
        let artifact = text_artifact("text_2.txt", "Acme Corp hired Jane Doe.");
        let entities = EntitySet {
            entities: vec!["Acme Corp".into(), "Jane Doe".into()],
            ..Default::default()
        };
        let record = assemble(
            &artifact,
            &entities,
            EmbeddingVector::Available(vec![0.1, 0.2]),
            "s3://acme-docs/reports/",
        )
        .unwrap();

        assert_eq!(record.file_path, "s3://acme-docs/reports/text_2.txt");
        assert_eq!(record.file_text, "Acme Corp hired Jane Doe.");
        assert_eq!(record.page_number, "2");
        assert_eq!(record.metadata.filename, "text_2.txt");
        assert_eq!(record.metadata.entities, "Acme Corp, Jane Doe");
    }

    #[test]
    fn image_record_prefixes_entities() {
        let artifact = Artifact::image(Path::new("/staging/image_5.png"));
        let entities = EntitySet {
            entities: vec!["Acme".into()],
            raw: Some("Acme".into()),
            description: Some("A bar chart.".into()),
        };
        let record = assemble(&artifact, &entities, EmbeddingVector::Unavailable, "s3://b/p").unwrap();

        assert_eq!(record.file_path, "s3://b/p/image_5.png");
        assert_eq!(record.file_text, "Acme\n\nA bar chart.");
        assert_eq!(record.metadata.entities, "Acme");
        assert_eq!(record.page_number, "5");
        assert_eq!(record.vector_embedding, EmbeddingVector::Unavailable);
    }

    #[test]
    fn unparsable_name_fails_assembly() {
        let artifact = text_artifact("notes.txt", "body");
        let err = assemble(&artifact, &EntitySet::default(), EmbeddingVector::Unavailable, "p")
            .unwrap_err();
        assert_eq!(err.file_name, "notes.txt");
        assert_eq!(err.kind, "text");
    }
}
