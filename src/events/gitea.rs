//! Gitea webhook translators.
//!
//! Four Gitea event kinds are supported, each registered under its own routing
//! key (the `X-Gitea-Event` header value prefixed with `gitea.`):
//!
//! | Routing key | Payload | Canonical event |
//! |-------------|---------|-----------------|
//! | `gitea.push` | [`PushEvent`] | `change.merged` |
//! | `gitea.pull_request` | [`PullRequestEvent`] | `change.created` / `change.merged` |
//! | `gitea.create` | [`CreateEvent`] | `branch.created` |
//! | `gitea.delete` | [`DeleteEvent`] | `branch.deleted` |
//!
//! The original provider event is attached as custom data, tagged with its
//! variant name, once every required-field check has passed.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::events::{
    CanonicalEvent, CanonicalEventType, Reference, TranslationError, Translator,
    TranslatorRegistry,
};

pub const PUSH_ROUTING_KEY: &str = "gitea.push";
pub const PULL_REQUEST_ROUTING_KEY: &str = "gitea.pull_request";
pub const CREATE_ROUTING_KEY: &str = "gitea.create";
pub const DELETE_ROUTING_KEY: &str = "gitea.delete";

const CUSTOM_DATA_CONTENT_TYPE: &str = "application/json";

/// Registry with every Gitea translator under its routing key.
pub fn default_registry() -> TranslatorRegistry {
    TranslatorRegistry::new()
        .with(PUSH_ROUTING_KEY, GiteaPush)
        .with(PULL_REQUEST_ROUTING_KEY, GiteaPullRequest)
        .with(CREATE_ROUTING_KEY, GiteaCreate)
        .with(DELETE_ROUTING_KEY, GiteaDelete)
}

// =============================================================================
// Payload shapes
// =============================================================================

/// Gitea sends `null` for absent values; decode it as the field's zero value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Owner {
    #[serde(deserialize_with = "null_as_default")]
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub owner: Owner,
    #[serde(deserialize_with = "null_as_default")]
    pub full_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub html_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ssh_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorCommitter {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commit {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub author: AuthorCommitter,
    #[serde(deserialize_with = "null_as_default")]
    pub committer: AuthorCommitter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushEvent {
    #[serde(rename = "ref", deserialize_with = "null_as_default")]
    pub git_ref: String,
    #[serde(deserialize_with = "null_as_default")]
    pub before: String,
    #[serde(deserialize_with = "null_as_default")]
    pub after: String,
    #[serde(deserialize_with = "null_as_default")]
    pub commits: Vec<Commit>,
    #[serde(deserialize_with = "null_as_default")]
    pub total_commits: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub head_commit: Commit,
    #[serde(deserialize_with = "null_as_default")]
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestRef {
    #[serde(deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(rename = "ref", deserialize_with = "null_as_default")]
    pub git_ref: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub base: PullRequestRef,
    #[serde(deserialize_with = "null_as_default")]
    pub head: PullRequestRef,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(deserialize_with = "null_as_default")]
    pub updated_at: String,
    #[serde(deserialize_with = "null_as_default")]
    pub closed_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestEvent {
    #[serde(deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(deserialize_with = "null_as_default")]
    pub number: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub pull_request: PullRequest,
    #[serde(deserialize_with = "null_as_default")]
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateEvent {
    #[serde(deserialize_with = "null_as_default")]
    pub sha: String,
    #[serde(rename = "ref", deserialize_with = "null_as_default")]
    pub git_ref: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ref_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteEvent {
    #[serde(rename = "ref", deserialize_with = "null_as_default")]
    pub git_ref: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ref_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub repository: Repository,
}

/// Provider event attached to the canonical event as custom data.
///
/// Serializes as `{"Kind": "structs.GiteaPushEvent", "Content": {...}}`, the
/// shape downstream consumers of the sink already parse.
#[derive(Debug, Serialize)]
#[serde(tag = "Kind", content = "Content")]
enum GiteaEvent<'a> {
    #[serde(rename = "structs.GiteaPushEvent")]
    Push(&'a PushEvent),
    #[serde(rename = "structs.GiteaPullRequestEvent")]
    PullRequest(&'a PullRequestEvent),
    #[serde(rename = "structs.GiteaCreateEvent")]
    Create(&'a CreateEvent),
    #[serde(rename = "structs.GiteaDeleteEvent")]
    Delete(&'a DeleteEvent),
}

impl GiteaEvent<'_> {
    fn attach_to(&self, cd_event: &mut CanonicalEvent) -> Result<(), TranslationError> {
        let data = serde_json::to_value(self)?;
        cd_event.set_custom_data(CUSTOM_DATA_CONTENT_TYPE, data);
        Ok(())
    }
}

// =============================================================================
// Repository-derived sources
// =============================================================================

/// Events that carry the repository they originate from.
pub trait RepositoryReference {
    fn repository(&self) -> &Repository;
}

impl RepositoryReference for PushEvent {
    fn repository(&self) -> &Repository {
        &self.repository
    }
}

impl RepositoryReference for PullRequestEvent {
    fn repository(&self) -> &Repository {
        &self.repository
    }
}

impl RepositoryReference for CreateEvent {
    fn repository(&self) -> &Repository {
        &self.repository
    }
}

impl RepositoryReference for DeleteEvent {
    fn repository(&self) -> &Repository {
        &self.repository
    }
}

/// Set the event source to the repository URL authority and the subject
/// source to authority + path.
///
/// `http://git.example.com:3000/org/repo` → source `git.example.com:3000`,
/// subject source `git.example.com:3000/org/repo`. The authority is kept as
/// written (a default port such as `:80` stays) and a URL without a path
/// yields a subject source without a trailing `/`.
pub fn derive_sources(
    event: &impl RepositoryReference,
    cd_event: &mut CanonicalEvent,
) -> Result<(), TranslationError> {
    let raw_url = &event.repository().html_url;
    if raw_url.is_empty() {
        return Err(TranslationError::MissingFields);
    }

    let url = Url::parse(raw_url).map_err(|_| TranslationError::MissingFields)?;
    if url.host_str().is_none() {
        return Err(TranslationError::MissingFields);
    }
    let (authority, has_path) = written_authority(raw_url).ok_or(TranslationError::MissingFields)?;
    let path = if has_path { url.path() } else { "" };

    cd_event.set_subject_source(format!("{authority}{path}"));
    cd_event.set_source(authority);
    Ok(())
}

/// Authority of `raw` without userinfo, and whether a path follows it.
fn written_authority(raw: &str) -> Option<(&str, bool)> {
    let (_scheme, rest) = raw.split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    Some((authority, rest[end..].starts_with('/')))
}

/// Source derivation for kinds where the repository URL is optional. An event
/// left without sources is rejected later by [`CanonicalEvent::validate`].
fn derive_sources_best_effort(event: &impl RepositoryReference, cd_event: &mut CanonicalEvent) {
    if let Err(err) = derive_sources(event, cd_event) {
        tracing::debug!(
            event_type = %cd_event.event_type(),
            html_url = %event.repository().html_url,
            error = %err,
            "could not derive event sources from repository URL"
        );
    }
}

// =============================================================================
// Translators
// =============================================================================

/// `push` → `change.merged`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GiteaPush;

impl Translator for GiteaPush {
    fn translate(&self, payload: &[u8]) -> Result<CanonicalEvent, TranslationError> {
        let event: PushEvent = serde_json::from_slice(payload)?;
        let mut cd_event = CanonicalEvent::new(CanonicalEventType::ChangeMerged);

        derive_sources(&event, &mut cd_event)?;
        if event.repository.full_name.is_empty() {
            return Err(TranslationError::MissingFields);
        }
        if event.total_commits == 0 {
            return Err(TranslationError::NoCommits);
        }
        if event.after.is_empty() {
            return Err(TranslationError::MissingFields);
        }

        cd_event.set_subject_id(&event.after);
        cd_event.set_subject_repository(Reference::new(&event.repository.full_name));
        GiteaEvent::Push(&event).attach_to(&mut cd_event)?;
        Ok(cd_event)
    }
}

/// `pull_request` → `change.created` (opened) or `change.merged` (closed).
#[derive(Debug, Clone, Copy, Default)]
pub struct GiteaPullRequest;

impl Translator for GiteaPullRequest {
    fn translate(&self, payload: &[u8]) -> Result<CanonicalEvent, TranslationError> {
        let event: PullRequestEvent = serde_json::from_slice(payload)?;

        if event.repository.full_name.is_empty() || event.action.is_empty() {
            return Err(TranslationError::MissingFields);
        }

        let mut cd_event = match event.action.as_str() {
            "opened" => {
                if event.pull_request.title.is_empty() {
                    return Err(TranslationError::MissingFields);
                }
                let mut cd_event = CanonicalEvent::new(CanonicalEventType::ChangeCreated);
                cd_event.set_subject_description(&event.pull_request.title);
                cd_event
            }
            "closed" => CanonicalEvent::new(CanonicalEventType::ChangeMerged),
            other => return Err(TranslationError::UnsupportedAction(other.to_string())),
        };
        cd_event.set_subject_repository(Reference::new(&event.repository.full_name));

        derive_sources_best_effort(&event, &mut cd_event);

        if event.pull_request.id == 0 {
            return Err(TranslationError::MissingFields);
        }
        cd_event.set_subject_id(format!("pr-{}", event.pull_request.id));

        GiteaEvent::PullRequest(&event).attach_to(&mut cd_event)?;
        Ok(cd_event)
    }
}

/// `create` (branches only) → `branch.created`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GiteaCreate;

impl Translator for GiteaCreate {
    fn translate(&self, payload: &[u8]) -> Result<CanonicalEvent, TranslationError> {
        let event: CreateEvent = serde_json::from_slice(payload)?;
        let mut cd_event = branch_event(
            CanonicalEventType::BranchCreated,
            &event,
            &event.ref_type,
            &event.git_ref,
        )?;
        GiteaEvent::Create(&event).attach_to(&mut cd_event)?;
        Ok(cd_event)
    }
}

/// `delete` (branches only) → `branch.deleted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GiteaDelete;

impl Translator for GiteaDelete {
    fn translate(&self, payload: &[u8]) -> Result<CanonicalEvent, TranslationError> {
        let event: DeleteEvent = serde_json::from_slice(payload)?;
        let mut cd_event = branch_event(
            CanonicalEventType::BranchDeleted,
            &event,
            &event.ref_type,
            &event.git_ref,
        )?;
        GiteaEvent::Delete(&event).attach_to(&mut cd_event)?;
        Ok(cd_event)
    }
}

fn branch_event(
    event_type: CanonicalEventType,
    event: &impl RepositoryReference,
    ref_type: &str,
    git_ref: &str,
) -> Result<CanonicalEvent, TranslationError> {
    if ref_type != "branch" {
        return Err(TranslationError::UnsupportedRefType(ref_type.to_string()));
    }

    let mut cd_event = CanonicalEvent::new(event_type);
    cd_event.set_subject_repository(Reference::new(&event.repository().full_name));
    derive_sources_best_effort(event, &mut cd_event);

    if git_ref.is_empty() {
        return Err(TranslationError::MissingFields);
    }
    cd_event.set_subject_id(git_ref);
    Ok(cd_event)
}
