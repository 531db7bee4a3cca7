//! Pull scenarios driven through [`DiagnosticsService`], without the wire.

use std::sync::Arc;

use diagpull_lsp::{
    AnalysisScope, DiagnosticsService, LintConfig, PreviousPullResult, PullReport, ServerConfig,
    WorkspacePullRequest,
};
use diagpull_types::DEFAULT_CATEGORY;

use crate::common::{
    SPELLING, SpellingProvider, diagnostics_of, pull_document, pull_workspace, service,
    updated_id, uri,
};

#[tokio::test]
async fn document_lifecycle_updated_unchanged_updated_removed() {
    let service = service();
    let a = uri("file:///notes/a.txt");
    service
        .workspace()
        .open_document(a.clone(), "TODO: write\n", Some(1))
        .unwrap();

    let first = pull_document(&service, &a, None, None).await;
    let r1 = updated_id(&first);
    assert_eq!(diagnostics_of(&first).len(), 1);
    assert!(r1.as_str().starts_with(&format!("{DEFAULT_CATEGORY}:")));

    let again = pull_document(&service, &a, Some(&r1), None).await;
    assert_eq!(
        again,
        PullReport::Unchanged {
            uri: a.clone(),
            version: Some(1),
            result_id: r1.clone(),
        }
    );

    service
        .workspace()
        .change_document(&a, "written\n", Some(2))
        .unwrap();
    let edited = pull_document(&service, &a, Some(&r1), None).await;
    let r2 = updated_id(&edited);
    assert_ne!(r1, r2);
    assert!(diagnostics_of(&edited).is_empty());

    service.workspace().close_document(&a).unwrap();
    let closed = pull_document(&service, &a, Some(&r2), None).await;
    assert_eq!(closed, PullReport::Removed { uri: a });
}

#[tokio::test]
async fn global_invalidation_recomputes_without_client_change() {
    let service = service();
    let a = uri("file:///notes/a.txt");
    service
        .workspace()
        .open_document(a.clone(), "fine  \n", Some(1))
        .unwrap();

    let r1 = updated_id(&pull_document(&service, &a, None, None).await);
    service.refresher().request_workspace_refresh();

    let after = pull_document(&service, &a, Some(&r1), None).await;
    assert_eq!(after.result_id(), Some(&r1));
    assert!(!after.is_change());
}

#[tokio::test]
async fn stale_client_id_gets_full_report() {
    let service = service();
    let a = uri("file:///notes/a.txt");
    service
        .workspace()
        .open_document(a.clone(), "text\n", Some(1))
        .unwrap();
    let r1 = updated_id(&pull_document(&service, &a, None, None).await);

    let stale = diagpull_types::ResultId::new("lint:999999");
    let report = pull_document(&service, &a, Some(&stale), None).await;
    let fresh = updated_id(&report);
    assert_ne!(fresh, stale);
    assert_ne!(fresh, r1);

    let again = pull_document(&service, &a, Some(&fresh), None).await;
    assert!(!again.is_change());
}

#[tokio::test]
async fn workspace_pass_orders_open_then_closed_then_projects() {
    let service = service();
    let workspace = service.workspace();
    let app = workspace.add_project("app", uri("file:///app"));
    workspace
        .add_document(app, uri("file:///app/b.txt"), "closed\n")
        .unwrap();
    workspace
        .add_document(app, uri("file:///app/a.txt"), "closed too\n")
        .unwrap();
    workspace.add_project("empty", uri("file:///empty/"));
    workspace
        .open_document(uri("file:///app/z.txt"), "open\n", Some(4))
        .unwrap();

    let reports = pull_workspace(&service, &WorkspacePullRequest::default()).await;
    let uris: Vec<&str> = reports.iter().map(|r| r.uri().as_str()).collect();
    assert_eq!(
        uris,
        vec![
            "file:///app/z.txt",
            "file:///app/a.txt",
            "file:///app/b.txt",
            "file:///app/",
            "file:///empty/",
        ]
    );
    assert!(reports.iter().all(PullReport::is_change));

    let empty = diagnostics_of(&reports[4]);
    assert_eq!(empty.len(), 1);
    assert_eq!(empty[0].code(), Some("empty-project"));
    assert!(diagnostics_of(&reports[3]).is_empty());
}

#[tokio::test]
async fn workspace_pass_reports_only_changes() {
    let service = service();
    let workspace = service.workspace();
    let a = uri("file:///a.txt");
    let b = uri("file:///b.txt");
    workspace.open_document(a.clone(), "a\n", Some(1)).unwrap();
    workspace.open_document(b.clone(), "b\n", Some(1)).unwrap();

    let first = pull_workspace(&service, &WorkspacePullRequest::default()).await;
    assert_eq!(first.len(), 2);
    let previous: Vec<PreviousPullResult> = first
        .iter()
        .map(|r| PreviousPullResult {
            uri: r.uri().clone(),
            result_id: updated_id(r),
        })
        .collect();

    workspace.change_document(&b, "b  \n", Some(2)).unwrap();
    let second = pull_workspace(
        &service,
        &WorkspacePullRequest {
            previous_results: previous,
            category: None,
        },
    )
    .await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].uri(), &b);
    assert_eq!(diagnostics_of(&second[0]).len(), 1);
}

#[tokio::test]
async fn vanished_documents_are_retracted_first() {
    let service = service();
    let workspace = service.workspace();
    let a = uri("file:///a.txt");
    let b = uri("file:///b.txt");
    workspace.open_document(a.clone(), "a\n", Some(1)).unwrap();
    workspace.open_document(b.clone(), "b\n", Some(1)).unwrap();

    let first = pull_workspace(&service, &WorkspacePullRequest::default()).await;
    let previous: Vec<PreviousPullResult> = first
        .iter()
        .map(|r| PreviousPullResult {
            uri: r.uri().clone(),
            result_id: updated_id(r),
        })
        .collect();

    workspace.close_document(&b).unwrap();
    workspace.change_document(&a, "a TODO\n", Some(2)).unwrap();

    let second = pull_workspace(
        &service,
        &WorkspacePullRequest {
            previous_results: previous,
            category: None,
        },
    )
    .await;
    assert_eq!(second.len(), 2);
    assert_eq!(second[0], PullReport::Removed { uri: b });
    assert_eq!(second[1].uri(), &a);
    assert!(second[1].is_change());
}

#[tokio::test]
async fn unchanged_reports_can_be_requested_for_workspace() {
    let service = DiagnosticsService::new(&ServerConfig {
        workspace_long_poll: false,
        report_unchanged_in_workspace: true,
        ..ServerConfig::default()
    });
    let a = uri("file:///a.txt");
    service
        .workspace()
        .open_document(a.clone(), "a\n", Some(1))
        .unwrap();

    let first = pull_workspace(&service, &WorkspacePullRequest::default()).await;
    let r1 = updated_id(&first[0]);
    let second = pull_workspace(
        &service,
        &WorkspacePullRequest {
            previous_results: vec![PreviousPullResult {
                uri: a.clone(),
                result_id: r1.clone(),
            }],
            category: None,
        },
    )
    .await;
    assert_eq!(
        second,
        vec![PullReport::Unchanged {
            uri: a,
            version: Some(1),
            result_id: r1,
        }]
    );
}

#[tokio::test]
async fn categories_are_cached_independently() {
    let service = service();
    service.register_provider(SPELLING, Arc::new(SpellingProvider));
    assert_eq!(
        service.categories(),
        vec![DEFAULT_CATEGORY.to_string(), SPELLING.to_string()]
    );

    let a = uri("file:///a.txt");
    service
        .workspace()
        .open_document(a.clone(), "teh end TODO\n", Some(1))
        .unwrap();

    let spelling = pull_document(&service, &a, None, Some(SPELLING)).await;
    let lint = pull_document(&service, &a, None, None).await;
    let spelling_id = updated_id(&spelling);
    assert!(spelling_id.as_str().starts_with("spelling:"));
    assert_eq!(diagnostics_of(&spelling)[0].message(), "possible misspelling of 'the'");
    assert_eq!(diagnostics_of(&lint)[0].code(), Some("todo"));

    // A lint-only change leaves the spelling result alone.
    service.set_lint_config(LintConfig {
        todo_markers: Vec::new(),
        ..LintConfig::default()
    });
    let again = pull_document(&service, &a, Some(&spelling_id), Some(SPELLING)).await;
    assert_eq!(again.result_id(), Some(&spelling_id));
    assert!(!again.is_change());
}

fn held(reports: &[PullReport]) -> Vec<PreviousPullResult> {
    reports
        .iter()
        .filter_map(|r| {
            Some(PreviousPullResult {
                uri: r.uri().clone(),
                result_id: r.result_id()?.clone(),
            })
        })
        .collect()
}

#[tokio::test]
async fn switching_analysis_scope_retracts_and_restores_closed_documents() {
    let service = service();
    let workspace = service.workspace();
    let app = workspace.add_project("app", uri("file:///app"));
    workspace
        .add_document(app, uri("file:///app/a.txt"), "closed\n")
        .unwrap();
    workspace
        .open_document(uri("file:///app/z.txt"), "open\n", Some(1))
        .unwrap();

    let full = pull_workspace(&service, &WorkspacePullRequest::default()).await;
    let uris: Vec<&str> = full.iter().map(|r| r.uri().as_str()).collect();
    assert_eq!(uris, vec!["file:///app/z.txt", "file:///app/a.txt", "file:///app/"]);

    assert!(service.set_lint_config(LintConfig {
        analysis_scope: AnalysisScope::OpenDocuments,
        ..LintConfig::default()
    }));
    let narrowed = pull_workspace(
        &service,
        &WorkspacePullRequest {
            previous_results: held(&full),
            category: None,
        },
    )
    .await;
    assert_eq!(
        narrowed,
        vec![
            PullReport::Removed {
                uri: uri("file:///app/a.txt")
            },
            PullReport::Removed {
                uri: uri("file:///app/")
            },
        ]
    );

    // The client now only holds the open document's result.
    assert!(service.set_lint_config(LintConfig::default()));
    let widened = pull_workspace(
        &service,
        &WorkspacePullRequest {
            previous_results: held(&full[..1]),
            category: None,
        },
    )
    .await;
    let uris: Vec<&str> = widened.iter().map(|r| r.uri().as_str()).collect();
    assert_eq!(uris, vec!["file:///app/a.txt", "file:///app/"]);
    assert!(widened.iter().all(PullReport::is_change));
}
