use std::collections::{btree_map, BTreeMap};

use crate::api::{CommentId, Time, UserId, VoteDirection};

/// What a soft-deleted comment's content renders as.
pub const REDACTED_CONTENT: &str = "[deleted]";

/// One rendered node of a thread: the comment as it should be displayed for
/// the owning user, with its children nested below it in creation order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub id: CommentId,
    pub author_id: UserId,

    /// Already redacted to [`REDACTED_CONTENT`] when `is_deleted`
    pub content: String,

    pub created_at: Time,
    pub updated_at: Time,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub is_pinned: bool,
    pub is_flagged: bool,

    pub upvotes: usize,
    pub downvotes: usize,
    pub my_vote: Option<VoteDirection>,

    /// Child comments in chronological order
    pub children: BTreeMap<Time, Vec<CommentNode>>,
}

impl CommentNode {
    pub fn find_in<'a>(
        comments: &'a BTreeMap<Time, Vec<CommentNode>>,
        id: &CommentId,
    ) -> Option<&'a CommentNode> {
        for c in comments.values().flat_map(|v| v.iter()) {
            if c.id == *id {
                return Some(c);
            }
            if let Some(res) = CommentNode::find_in(&c.children, id) {
                return Some(res);
            }
        }
        None
    }
}

type Siblings<'a> = std::iter::Flatten<btree_map::Values<'a, Time, Vec<CommentNode>>>;

/// Depth-first, chronological traversal of a forest of [`CommentNode`]s,
/// yielding each node with its nesting depth (roots are depth 0). The walk
/// borrows the tree and can be restarted at will by asking for a new one.
pub struct Walk<'a> {
    stack: Vec<Siblings<'a>>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(roots: &'a BTreeMap<Time, Vec<CommentNode>>) -> Walk<'a> {
        Walk {
            stack: vec![roots.values().flatten()],
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a CommentNode);

    fn next(&mut self) -> Option<(usize, &'a CommentNode)> {
        loop {
            let siblings = self.stack.last_mut()?;
            match siblings.next() {
                Some(node) => {
                    let depth = self.stack.len() - 1;
                    self.stack.push(node.children.values().flatten());
                    return Some((depth, node));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
