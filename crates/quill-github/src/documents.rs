//! GraphQL documents consumed by the client.
//!
//! Only the operations the reconciler needs; response shapes are mirrored by
//! the deserialization structs in `models`.

pub const RESOLVE_IDS: &str = "\
query ResolveIds($org: String!, $repo: String!, $projectNumber: Int!) {
  repository(owner: $org, name: $repo) {
    id
  }
  organization(login: $org) {
    projectV2(number: $projectNumber) {
      id
      fields(first: 30) {
        nodes {
          ... on ProjectV2SingleSelectField {
            id
            name
            options {
              id
              name
            }
          }
        }
      }
    }
  }
}";

pub const CREATE_ISSUE: &str = "\
mutation CreateIssue($repositoryId: ID!, $title: String!, $body: String!) {
  createIssue(input: {repositoryId: $repositoryId, title: $title, body: $body}) {
    issue {
      id
      number
      url
    }
  }
}";

pub const ADD_TO_PROJECT: &str = "\
mutation AddToProject($projectId: ID!, $contentId: ID!) {
  addProjectV2ItemById(input: {projectId: $projectId, contentId: $contentId}) {
    item {
      id
    }
  }
}";

pub const UPDATE_PROJECT_FIELD: &str = "\
mutation UpdateField($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
  updateProjectV2ItemFieldValue(input: {
    projectId: $projectId
    itemId: $itemId
    fieldId: $fieldId
    value: {singleSelectOptionId: $optionId}
  }) {
    projectV2Item {
      id
    }
  }
}";

pub const ADD_ASSIGNEES: &str = "\
mutation AddAssignees($issueId: ID!, $assigneeIds: [ID!]!) {
  addAssigneesToAssignable(input: {assignableId: $issueId, assigneeIds: $assigneeIds}) {
    assignable {
      ... on Issue {
        id
      }
    }
  }
}";

pub const RESOLVE_USER_ID: &str = "\
query ResolveUserId($login: String!) {
  user(login: $login) {
    id
  }
}";

pub const PROJECT_ITEMS_PAGE: &str = "\
query ProjectItemsPage($org: String!, $projectNumber: Int!, $after: String) {
  organization(login: $org) {
    projectV2(number: $projectNumber) {
      items(first: 100, after: $after) {
        pageInfo {
          hasNextPage
          endCursor
        }
        nodes {
          id
          content {
            ... on Issue {
              id
              title
              body
              url
              number
              state
              assignees(first: 10) {
                nodes {
                  login
                }
              }
              repository {
                nameWithOwner
              }
            }
          }
          fieldValues(first: 20) {
            nodes {
              ... on ProjectV2ItemFieldSingleSelectValue {
                name
                field {
                  ... on ProjectV2SingleSelectField {
                    name
                  }
                }
              }
            }
          }
        }
      }
    }
  }
}";

pub const USER_ISSUES_PAGE: &str = "\
query UserIssuesPage($login: String!, $after: String) {
  user(login: $login) {
    issues(first: 100, after: $after, filterBy: {states: OPEN}) {
      pageInfo {
        hasNextPage
        endCursor
      }
      nodes {
        id
        title
        body
        url
        number
        state
        assignees(first: 10) {
          nodes {
            login
          }
        }
        repository {
          nameWithOwner
        }
      }
    }
  }
}";

pub const SEARCH_ISSUES_BY_MARKER: &str = "\
query SearchIssuesByMarker($query: String!) {
  search(query: $query, type: ISSUE, first: 10) {
    nodes {
      ... on Issue {
        id
        title
        body
        url
        number
        state
        assignees(first: 10) {
          nodes {
            login
          }
        }
        repository {
          nameWithOwner
        }
      }
    }
  }
}";

pub const RATE_LIMIT: &str = "\
query RateLimit {
  rateLimit {
    limit
    remaining
    resetAt
  }
}";
