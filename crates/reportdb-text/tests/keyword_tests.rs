use reportdb_core::types::{Chunk, ChunkKind, Source};
use reportdb_text::KeywordIndex;

fn chunk(id: &str, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        source: Source::new(id.split('#').next().unwrap_or(id)),
        kind: ChunkKind::Text,
        token_count: text.split_whitespace().count(),
        token_offset: 0,
    }
}

fn corpus() -> Vec<Chunk> {
    vec![
        chunk("kb#0001", "Seoul apartment sale prices rose for the third consecutive month."),
        chunk("kb#0002", "Jeonse deposits in Seoul stayed flat while monthly rent climbed."),
        chunk("hd#0001", "Construction permits fell sharply in the capital region."),
        chunk("khi#0001", "Household debt linked to mortgages rose again; mortgages dominate."),
        chunk("khi#0002", "서울 아파트 전세 가격은 보합세를 보였다."),
    ]
}

#[test]
fn ranks_matching_chunks_only() -> anyhow::Result<()> {
    let idx = KeywordIndex::build(&corpus())?;
    assert_eq!(idx.num_chunks(), 5);
    let hits = idx.search("mortgages", 10)?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "khi#0001");
    assert_eq!(hits[0].rank, 1);
    assert!(hits[0].score > 0.0);
    Ok(())
}

#[test]
fn query_syntax_characters_are_plain_text() -> anyhow::Result<()> {
    let idx = KeywordIndex::build(&corpus())?;
    let hits = idx.search("What happened to Seoul jeonse: rent? (AND OR)", 10)?;
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids.first(), Some(&"kb#0002"));
    assert!(ids.contains(&"kb#0001"));
    Ok(())
}

#[test]
fn korean_terms_match() -> anyhow::Result<()> {
    let idx = KeywordIndex::build(&corpus())?;
    let hits = idx.search("전세 가격", 3)?;
    assert_eq!(hits[0].chunk_id, "khi#0002");
    Ok(())
}

#[test]
fn long_korean_compound_is_searchable() -> anyhow::Result<()> {
    let mut chunks = corpus();
    chunks.push(chunk("hd#0002", "정부는 주택담보대출금리인상부담완화정책 을 발표했다."));
    let idx = KeywordIndex::build(&chunks)?;
    let hits = idx.search("주택담보대출금리인상부담완화정책", 3)?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "hd#0002");
    assert_eq!(idx.term_stats("주택담보대출금리인상부담완화정책")?.doc_freq, 1);
    Ok(())
}

#[test]
fn results_are_bounded_and_ranked() -> anyhow::Result<()> {
    let idx = KeywordIndex::build(&corpus())?;
    let hits = idx.search("seoul rose prices rent mortgages permits", 2)?;
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits.iter().map(|h| h.rank).collect::<Vec<_>>(), vec![1, 2]);
    Ok(())
}

#[test]
fn equal_scores_tie_break_on_chunk_id() -> anyhow::Result<()> {
    let chunks = vec![chunk("c", "vacancy"), chunk("a", "vacancy"), chunk("b", "vacancy")];
    let idx = KeywordIndex::build(&chunks)?;
    let ids: Vec<String> = idx.search("vacancy", 3)?.into_iter().map(|h| h.chunk_id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn rebuild_gives_identical_statistics() -> anyhow::Result<()> {
    let a = KeywordIndex::build(&corpus())?;
    let b = KeywordIndex::build(&corpus())?;
    assert_eq!(a.chunk_ids(), b.chunk_ids());
    assert_eq!(a.term_stats("Seoul")?, b.term_stats("seoul")?);
    assert_eq!(a.term_stats("SEOUL")?.doc_freq, 2);
    assert_eq!(a.term_stats("the")?.doc_freq, 0);
    let qa = a.search("seoul rent", 5)?;
    let qb = b.search("seoul rent", 5)?;
    assert_eq!(qa, qb);
    Ok(())
}

#[test]
fn empty_corpus_yields_no_hits() -> anyhow::Result<()> {
    let idx = KeywordIndex::build(&[])?;
    assert_eq!(idx.num_chunks(), 0);
    assert!(idx.search("anything", 5)?.is_empty());
    Ok(())
}
