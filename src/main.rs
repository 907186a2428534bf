fn main() {
    ez3d_lib::run()
}
