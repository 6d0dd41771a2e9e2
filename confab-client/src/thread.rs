use std::collections::{BTreeMap, HashMap};

use crate::{
    api::{Comment, CommentId, PostId, Time, UserId},
    CommentNode, Walk, REDACTED_CONTENT,
};

/// The rendered comment forest for one post.
///
/// Soft-deleted comments appear as redacted stubs if and only if something
/// active still lives below them; a deleted comment with no active
/// descendant is pruned outright. This is what keeps a thread connected
/// without resurrecting deleted leaves.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadView {
    pub post_id: PostId,
    pub roots: BTreeMap<Time, Vec<CommentNode>>,
}

impl ThreadView {
    pub(crate) fn build(
        post_id: PostId,
        comments: &HashMap<CommentId, Comment>,
        for_user: &UserId,
    ) -> ThreadView {
        // Group by parent, with deterministic sibling order: creation time,
        // then id to break same-instant ties.
        let mut in_post: Vec<&Comment> = comments
            .values()
            .filter(|c| c.post_id == post_id)
            .collect();
        in_post.sort_by_key(|c| (c.created_at, c.id));

        let mut children_of: HashMap<CommentId, Vec<&Comment>> = HashMap::new();
        let mut roots: Vec<&Comment> = Vec::new();
        for c in &in_post {
            match c.parent_id {
                None => roots.push(c),
                // the parent must also live in this post, or it will never be
                // built as a node of this view and the child would vanish
                Some(parent)
                    if comments
                        .get(&parent)
                        .map_or(false, |p| p.post_id == post_id) =>
                {
                    children_of.entry(parent).or_insert_with(Vec::new).push(c)
                }
                Some(parent) => {
                    // should not happen with a consistent server; surface the
                    // comment as a root rather than silently dropping it
                    tracing::warn!(?parent, comment = ?c.id, "comment with unknown parent");
                    roots.push(c);
                }
            }
        }

        let mut forest = BTreeMap::new();
        for root in roots {
            if let Some(node) = Self::build_node(root, &children_of, for_user) {
                forest
                    .entry(node.created_at)
                    .or_insert_with(Vec::new)
                    .push(node);
            }
        }
        ThreadView {
            post_id,
            roots: forest,
        }
    }

    /// Returns None when the whole subtree rooted here should be pruned.
    fn build_node(
        comment: &Comment,
        children_of: &HashMap<CommentId, Vec<&Comment>>,
        for_user: &UserId,
    ) -> Option<CommentNode> {
        let mut children = BTreeMap::new();
        for child in children_of.get(&comment.id).into_iter().flatten() {
            if let Some(node) = Self::build_node(child, children_of, for_user) {
                children
                    .entry(node.created_at)
                    .or_insert_with(Vec::new)
                    .push(node);
            }
        }

        if !comment.is_active && children.is_empty() {
            return None;
        }

        let tally = comment.tally(for_user);
        Some(CommentNode {
            id: comment.id,
            author_id: comment.author_id,
            content: match comment.is_active {
                true => comment.content.clone(),
                false => String::from(REDACTED_CONTENT),
            },
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            is_edited: comment.is_edited,
            is_deleted: !comment.is_active,
            is_pinned: comment.is_pinned,
            is_flagged: comment.is_flagged,
            upvotes: tally.upvotes,
            downvotes: tally.downvotes,
            my_vote: tally.my_vote,
            children,
        })
    }

    /// Lazy depth-annotated traversal over the whole forest; call again for
    /// a fresh restartable walk.
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(&self.roots)
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        CommentNode::find_in(&self.roots, id)
    }
}
