fn main() {
    vn_panel_lib::run()
}
