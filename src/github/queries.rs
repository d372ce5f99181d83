//! GraphQL documents used by the hydrator.
//!
//! Timeline items are filtered to the event types the projector maps; actor
//! fragments carry login and databaseId so the projector never has to fall
//! back to opaque node ids.

pub const GET_CORE: &str = r#"
query GetIssueOrPRCore($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    issueOrPullRequest(number: $number) {
      __typename
      ... on Issue {
        id
        databaseId
        number
        url
        title
        body
        state
        locked
        author { __typename login url ... on User { databaseId } ... on Bot { databaseId } }
        authorAssociation
        createdAt
        updatedAt
        closedAt
        labels(first: 100) { nodes { name color description } }
        milestone { title state number }
        assignees(first: 100) { nodes { login databaseId } }
        comments { totalCount }
      }
      ... on PullRequest {
        id
        databaseId
        number
        url
        title
        body
        state
        isDraft
        locked
        author { __typename login url ... on User { databaseId } ... on Bot { databaseId } }
        authorAssociation
        createdAt
        updatedAt
        closedAt
        mergedAt
        mergedBy { __typename login url ... on User { databaseId } }
        mergeCommit { oid url }
        baseRefName
        headRefName
        additions
        deletions
        changedFiles
        labels(first: 100) { nodes { name color description } }
        milestone { title state number }
        assignees(first: 100) { nodes { login databaseId } }
        comments { totalCount }
        reviews { totalCount }
        files { totalCount }
      }
    }
  }
}
"#;

pub const GET_COMMENTS_PAGE: &str = r#"
query GetItemCommentsPage($owner: String!, $name: String!, $number: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issueOrPullRequest(number: $number) {
      __typename
      ... on Issue {
        comments(first: 100, after: $after) {
          pageInfo { hasNextPage endCursor }
          nodes {
            id
            databaseId
            url
            body
            createdAt
            updatedAt
            author { __typename login url ... on User { databaseId } ... on Bot { databaseId } }
            authorAssociation
          }
        }
      }
      ... on PullRequest {
        comments(first: 100, after: $after) {
          pageInfo { hasNextPage endCursor }
          nodes {
            id
            databaseId
            url
            body
            createdAt
            updatedAt
            author { __typename login url ... on User { databaseId } ... on Bot { databaseId } }
            authorAssociation
          }
        }
      }
    }
  }
}
"#;

pub const GET_TIMELINE_PAGE: &str = r#"
query GetItemTimelinePage($owner: String!, $name: String!, $number: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issueOrPullRequest(number: $number) {
      __typename
      ... on Issue {
        timelineItems(
          first: 100
          after: $after
          itemTypes: [
            CLOSED_EVENT, REOPENED_EVENT,
            LABELED_EVENT, UNLABELED_EVENT,
            ASSIGNED_EVENT, UNASSIGNED_EVENT,
            MILESTONED_EVENT, DEMILESTONED_EVENT,
            RENAMED_TITLE_EVENT,
            CROSS_REFERENCED_EVENT, REFERENCED_EVENT
          ]
        ) {
          pageInfo { hasNextPage endCursor }
          nodes { ...timelineFields }
        }
      }
      ... on PullRequest {
        timelineItems(
          first: 100
          after: $after
          itemTypes: [
            CLOSED_EVENT, REOPENED_EVENT,
            LABELED_EVENT, UNLABELED_EVENT,
            ASSIGNED_EVENT, UNASSIGNED_EVENT,
            MILESTONED_EVENT, DEMILESTONED_EVENT,
            RENAMED_TITLE_EVENT,
            CROSS_REFERENCED_EVENT, REFERENCED_EVENT
          ]
        ) {
          pageInfo { hasNextPage endCursor }
          nodes { ...timelineFields }
        }
      }
    }
  }
}

fragment actorFields on Actor {
  __typename
  login
  url
}

fragment timelineFields on IssueTimelineItems {
  __typename
  ... on ClosedEvent { id createdAt actor { ...actorFields } }
  ... on ReopenedEvent { id createdAt actor { ...actorFields } }
  ... on LabeledEvent { id createdAt actor { ...actorFields } label { name color } }
  ... on UnlabeledEvent { id createdAt actor { ...actorFields } label { name color } }
  ... on AssignedEvent { id createdAt actor { ...actorFields } assignee { ... on User { login } } }
  ... on UnassignedEvent { id createdAt actor { ...actorFields } assignee { ... on User { login } } }
  ... on MilestonedEvent { id createdAt actor { ...actorFields } milestoneTitle }
  ... on DemilestonedEvent { id createdAt actor { ...actorFields } milestoneTitle }
  ... on RenamedTitleEvent { id createdAt actor { ...actorFields } previousTitle currentTitle }
  ... on CrossReferencedEvent {
    id createdAt actor { ...actorFields }
    source { __typename ... on Issue { number url title } ... on PullRequest { number url title } }
  }
  ... on ReferencedEvent {
    id createdAt actor { ...actorFields }
    commit { oid url }
    commitRepository { nameWithOwner }
  }
}
"#;

pub const GET_PR_REVIEWS_PAGE: &str = r#"
query GetPRReviewsPage($owner: String!, $name: String!, $number: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      reviews(first: 100, after: $after) {
        pageInfo { hasNextPage endCursor }
        nodes {
          id
          databaseId
          author { __typename login url ... on User { databaseId } }
          state
          body
          submittedAt
        }
      }
    }
  }
}
"#;

pub const GET_PR_FILES_PAGE: &str = r#"
query GetPRFilesPage($owner: String!, $name: String!, $number: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      files(first: 100, after: $after) {
        pageInfo { hasNextPage endCursor }
        nodes {
          path
          additions
          deletions
          changeType
        }
      }
    }
  }
}
"#;
