//! OpenAPI document (§4.11): generated with `utoipa`, served by
//! `utoipa-swagger-ui` at `/swagger-ui`. Schema generation itself is an
//! external collaborator; this module only registers the fixed dialect's
//! paths.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(),
    tags(
        (name = "revisions", description = "Revision expansion"),
        (name = "deleted-revisions", description = "Deleted-revision reconstruction"),
        (name = "largest-edits", description = "Largest-edit ranking"),
        (name = "search-talk", description = "Talk-page scanning"),
    ),
    info(
        title = "Dispatch",
        description = "MediaWiki aggregation and acceleration tier",
        version = "1.0.0",
    )
)]
pub struct ApiDoc;
