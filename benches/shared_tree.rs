use criterion::{criterion_group, criterion_main, Criterion};

macro_rules! create_test {
    ($Ptr:ident, $new:path) => {
        #[derive(Debug)]
        pub struct Node<T> {
            value: T,
            left: Option<$Ptr<Node<T>>>,
            right: Option<$Ptr<Node<T>>>,
        }

        pub fn create_tree(depth: i32) -> $Ptr<Node<i32>> {
            if depth == 0 {
                return $new(Node {
                    value: 0,
                    left: None,
                    right: None,
                });
            }
            $new(Node {
                value: depth,
                left: Some(create_tree(depth - 1)),
                right: Some(create_tree(depth - 1)),
            })
        }

        pub fn tree_traversal(node: &$Ptr<Node<i32>>) -> i32 {
            let mut sum = node.value;
            if let Some(left) = &node.left {
                sum += tree_traversal(left);
            }
            if let Some(right) = &node.right {
                sum += tree_traversal(right);
            }
            sum
        }
    };
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("binary-tree build ctlptr::SharedPtr", |b| {
        use ctlptr::{make_shared, SharedPtr};
        create_test!(SharedPtr, make_shared);
        b.iter(|| create_tree(12))
    });
    c.bench_function("binary-tree build std::Rc", |b| {
        use std::rc::Rc;
        create_test!(Rc, Rc::new);
        b.iter(|| create_tree(12))
    });
    c.bench_function("binary-tree ctlptr::SharedPtr", |b| {
        use ctlptr::{make_shared, SharedPtr};
        create_test!(SharedPtr, make_shared);
        let tree = create_tree(20);
        b.iter(|| tree_traversal(&tree))
    });
    c.bench_function("binary-tree std::Rc", |b| {
        use std::rc::Rc;
        create_test!(Rc, Rc::new);
        let tree = create_tree(20);
        b.iter(|| tree_traversal(&tree))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
