// SPDX-License-Identifier: MPL-2.0

//! Root-branch enumeration against the live System Tree singleton.

use azalea_kernel::tree::{self, Branch};

#[test]
fn branch_enumeration_under_the_root() {
    azalea_kernel::init();
    let root = tree::root();

    for name in ["branch_a", "branch_b", "branch_c", "branch_d"] {
        root.create_child(&format!("\\{name}")).unwrap();
    }

    assert_eq!(root.num_children().unwrap(), 4);
    assert_eq!(
        root.enum_children("", 0).unwrap(),
        ["branch_a", "branch_b", "branch_c", "branch_d"]
    );

    root.delete_child("\\branch_c").unwrap();
    assert_eq!(root.enum_children("branch_c", 0).unwrap(), ["branch_d"]);
    assert_eq!(root.num_children().unwrap(), 3);

    // Deleted children never reappear in an enumeration.
    assert!(!root
        .enum_children("", 0)
        .unwrap()
        .contains(&"branch_c".to_string()));
}
