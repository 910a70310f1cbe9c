use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Free-form rendering hints carried verbatim from producer to client.
///
/// Keys are kept sorted so the JSON form is deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Map(Metadata),
}

impl MetadataValue {
    /// Nesting depth of this value; scalars are depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Self::Map(map) => 1 + map.values().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    TaskAssigned,
    TaskUnassigned,
    TaskUpdated,
    TaskCompleted,
    TaskDueSoon,
    CommentAdded,
    CommentMention,
    CommentReply,
    WorkspaceInvitation,
    WorkspaceMemberJoined,
    WorkspaceMemberRemoved,
    WorkspaceRoleChanged,
    BoardCreated,
    BoardShared,
    BoardArchived,
}

impl NotificationType {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "TASK_ASSIGNED" => Some(Self::TaskAssigned),
            "TASK_UNASSIGNED" => Some(Self::TaskUnassigned),
            "TASK_UPDATED" => Some(Self::TaskUpdated),
            "TASK_COMPLETED" => Some(Self::TaskCompleted),
            "TASK_DUE_SOON" => Some(Self::TaskDueSoon),
            "COMMENT_ADDED" => Some(Self::CommentAdded),
            "COMMENT_MENTION" => Some(Self::CommentMention),
            "COMMENT_REPLY" => Some(Self::CommentReply),
            "WORKSPACE_INVITATION" => Some(Self::WorkspaceInvitation),
            "WORKSPACE_MEMBER_JOINED" => Some(Self::WorkspaceMemberJoined),
            "WORKSPACE_MEMBER_REMOVED" => Some(Self::WorkspaceMemberRemoved),
            "WORKSPACE_ROLE_CHANGED" => Some(Self::WorkspaceRoleChanged),
            "BOARD_CREATED" => Some(Self::BoardCreated),
            "BOARD_SHARED" => Some(Self::BoardShared),
            "BOARD_ARCHIVED" => Some(Self::BoardArchived),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::TaskAssigned => "TASK_ASSIGNED",
            Self::TaskUnassigned => "TASK_UNASSIGNED",
            Self::TaskUpdated => "TASK_UPDATED",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskDueSoon => "TASK_DUE_SOON",
            Self::CommentAdded => "COMMENT_ADDED",
            Self::CommentMention => "COMMENT_MENTION",
            Self::CommentReply => "COMMENT_REPLY",
            Self::WorkspaceInvitation => "WORKSPACE_INVITATION",
            Self::WorkspaceMemberJoined => "WORKSPACE_MEMBER_JOINED",
            Self::WorkspaceMemberRemoved => "WORKSPACE_MEMBER_REMOVED",
            Self::WorkspaceRoleChanged => "WORKSPACE_ROLE_CHANGED",
            Self::BoardCreated => "BOARD_CREATED",
            Self::BoardShared => "BOARD_SHARED",
            Self::BoardArchived => "BOARD_ARCHIVED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Task,
    Comment,
    Workspace,
    Board,
}

impl ResourceType {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "task" => Some(Self::Task),
            "comment" => Some(Self::Comment),
            "workspace" => Some(Self::Workspace),
            "board" => Some(Self::Board),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Comment => "comment",
            Self::Workspace => "workspace",
            Self::Board => "board",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub actor_id: Uuid,
    pub target_user_id: Uuid,
    pub scope_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub is_read: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A producer's description of something that happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub actor_id: Uuid,
    pub target_user_id: Uuid,
    pub scope_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Backdates `created_at` when the event happened earlier than it is reported.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub occurred_at: Option<OffsetDateTime>,
}

impl NewNotification {
    /// Materializes the event into an unread record created at `now`
    /// unless the producer supplied its own occurrence time.
    pub fn into_notification(self, now: OffsetDateTime) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            notification_type: self.notification_type,
            actor_id: self.actor_id,
            target_user_id: self.target_user_id,
            scope_id: self.scope_id,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            resource_name: self.resource_name,
            metadata: self.metadata,
            is_read: false,
            read_at: None,
            created_at: self.occurred_at.unwrap_or(now),
        }
    }
}

/// One page of a recipient's notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: i64,
    pub has_more: bool,
}

impl NotificationPage {
    /// Rows skipped before 1-based `page`, or `None` when that position is
    /// not representable.
    pub fn offset(page: i64, limit: i64) -> Option<i64> {
        (page.max(1) - 1).checked_mul(limit.max(0))
    }

    /// A page past the last row.
    pub fn beyond_end(total: i64) -> Self {
        Self {
            items: Vec::new(),
            total,
            has_more: false,
        }
    }
}

/// What a successful ownership-scoped delete removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedNotification {
    pub scope_id: Uuid,
    pub was_unread: bool,
}
