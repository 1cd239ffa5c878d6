// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use super::*;

fn session(id: &str, project: &str) -> SessionRecord {
    SessionRecord {
        id: id.to_owned(),
        kind: "local-terminal".to_owned(),
        project_id: project.to_owned(),
        status: "active".to_owned(),
        descriptor: "{}".to_owned(),
        created_at: 1,
        updated_at: 1,
        last_active_at: 1,
        exit_code: None,
        metadata: "{}".to_owned(),
    }
}

#[tokio::test]
async fn project_roundtrip() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let record = ProjectRecord {
        id: "prj_abcdefgh".to_owned(),
        name: "demo".to_owned(),
        path: "/tmp/demo".to_owned(),
        created_at: 42,
    };
    store.upsert_project(&record).await?;
    assert_eq!(store.get_project("prj_abcdefgh").await?, Some(record.clone()));
    assert_eq!(store.list_projects().await?, vec![record]);
    assert!(store.delete_project("prj_abcdefgh").await?);
    assert!(store.get_project("prj_abcdefgh").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn session_upsert_updates_status() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let mut record = session("ses_abcdefgh", "prj_abcdefgh");
    store.upsert_session(&record).await?;

    record.status = "disconnected".to_owned();
    record.exit_code = Some(0);
    store.upsert_session(&record).await?;

    let loaded = store.load_sessions().await?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].status, "disconnected");
    assert_eq!(loaded[0].exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn buffer_flush_roundtrip() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let record = BufferRecord {
        session_id: "ses_abcdefgh".to_owned(),
        content: "line one\nline two".to_owned(),
        total_lines: 2,
        last_flush_at: 99,
    };
    store.save_buffer(&record).await?;
    assert_eq!(store.load_buffer("ses_abcdefgh").await?, Some(record));
    assert!(store.load_buffer("ses_missing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn deleting_session_drops_buffer() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.upsert_session(&session("ses_abcdefgh", "prj_x")).await?;
    store
        .save_buffer(&BufferRecord {
            session_id: "ses_abcdefgh".to_owned(),
            content: "x".to_owned(),
            total_lines: 1,
            last_flush_at: 1,
        })
        .await?;

    assert!(store.delete_session("ses_abcdefgh").await?);
    assert!(store.load_buffer("ses_abcdefgh").await?.is_none());
    assert!(store.load_sessions().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn notes_scoped_to_project() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store
        .add_note(&NoteRecord {
            id: "note_a".to_owned(),
            project_id: "prj_one".to_owned(),
            body: "first".to_owned(),
            created_at: 1,
        })
        .await?;
    store
        .add_note(&NoteRecord {
            id: "note_b".to_owned(),
            project_id: "prj_two".to_owned(),
            body: "second".to_owned(),
            created_at: 2,
        })
        .await?;

    let notes = store.list_notes("prj_one").await?;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].body, "first");
    Ok(())
}
