use criterion::{criterion_group, criterion_main, Criterion};
use navmenu_core::{
    annotate, assemble, ItemId, MenuItem, RequestPath, RouteTable,
};

fn mk_item(menu_key: &str, parent_id: Option<ItemId>, title: &str, order: u32) -> MenuItem {
    MenuItem {
        item_id: ItemId::new(),
        menu_key: menu_key.to_string(),
        parent_id,
        title: title.to_string(),
        url: Some(format!("/catalog/{title}/")),
        named_route: None,
        named_args: None,
        named_kwargs: None,
        order,
    }
}

fn wide_menu(sections: u32, children_per_section: u32) -> Vec<MenuItem> {
    let mut items = Vec::new();
    for section in 0..sections {
        let root = mk_item("bench_menu", None, &format!("section-{section}"), section);
        let root_id = root.item_id;
        items.push(root);
        for child in 0..children_per_section {
            items.push(mk_item(
                "bench_menu",
                Some(root_id),
                &format!("section-{section}-item-{child}"),
                child,
            ));
        }
    }
    items
}

fn bench_assemble(c: &mut Criterion) {
    let items = wide_menu(10, 20);
    c.bench_function("assemble_210_items", |b| {
        b.iter(|| assemble(items.clone()));
    });
}

fn bench_assemble_and_annotate(c: &mut Criterion) {
    let items = wide_menu(10, 20);
    let routes = RouteTable::new();
    let request = RequestPath::from_target("/catalog/section-7-item-12/");
    c.bench_function("assemble_annotate_210_items", |b| {
        b.iter(|| {
            let mut forest = assemble(items.clone());
            annotate(&mut forest, &request, &routes);
            forest
        });
    });
}

criterion_group!(benches, bench_assemble, bench_assemble_and_annotate);
criterion_main!(benches);
